//! Prompt utilities for the terminal client.

use std::io::Write;

use crate::domain::UserId;

pub fn prompt_text(user_id: &UserId) -> String {
    format!("{}> ", user_id)
}

/// Redisplay the prompt after printing output
pub fn redisplay_prompt(user_id: &UserId) {
    print!("{}", prompt_text(user_id));
    std::io::stdout().flush().ok();
}
