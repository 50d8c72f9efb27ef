//! Terminal chat session: printing the room and handling user input.

use std::{collections::HashSet, path::Path};

use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    ChatClient,
    domain::{ChatId, DedupKey, OutgoingMessage, UserId},
    infrastructure::UploadFile,
};

use super::{
    domain::{InputCommand, USAGE, parse_input},
    error::ClientError,
    formatter::MessageFormatter,
    prompt::{prompt_text, redisplay_prompt},
};

/// Whether the input loop should keep going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// One user attached to one room
pub struct Session {
    client: ChatClient,
    chat_id: ChatId,
    user_id: UserId,
}

impl Session {
    pub fn new(client: ChatClient, chat_id: ChatId, user_id: UserId) -> Self {
        Self {
            client,
            chat_id,
            user_id,
        }
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Spawn a task printing every newly accepted message of the room once.
    ///
    /// The task ends when the room's stream is dropped.
    pub async fn spawn_printer(&self) -> JoinHandle<()> {
        let mut subscription = self.client.listen(&self.chat_id).await;
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            let mut printed: HashSet<DedupKey> = HashSet::new();

            while let Some(snapshot) = subscription.next().await {
                let mut any = false;
                for message in &snapshot {
                    if printed.insert(message.dedup_key()) {
                        print!("{}", MessageFormatter::format_chat_message(message, &user_id));
                        any = true;
                    }
                }
                if any {
                    redisplay_prompt(&user_id);
                }
            }

            tracing::debug!("Message stream ended");
        })
    }

    /// Spawn a blocking thread reading lines with rustyline.
    ///
    /// The returned channel closes on Ctrl+C, Ctrl+D or a readline error.
    pub fn spawn_input_reader(&self) -> mpsc::UnboundedReceiver<String> {
        let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();
        let prompt = prompt_text(&self.user_id);

        std::thread::spawn(move || {
            let mut rl = match DefaultEditor::new() {
                Ok(rl) => rl,
                Err(e) => {
                    tracing::error!("Failed to initialize readline: {}", e);
                    return;
                }
            };

            loop {
                match rl.readline(&prompt) {
                    Ok(line) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            rl.add_history_entry(line).ok();
                            if input_tx.send(line.to_string()).is_err() {
                                break;
                            }
                        }
                    }
                    Err(ReadlineError::Interrupted) => {
                        tracing::info!("Interrupted");
                        break;
                    }
                    Err(ReadlineError::Eof) => {
                        tracing::info!("EOF");
                        break;
                    }
                    Err(err) => {
                        tracing::error!("Readline error: {}", err);
                        break;
                    }
                }
            }
        });

        input_rx
    }

    /// Handle one line of user input.
    ///
    /// Failures of a single command are reported and do not end the session.
    pub async fn handle_line(&self, line: &str) -> Flow {
        let result = match parse_input(line) {
            InputCommand::Quit => return Flow::Quit,
            InputCommand::Send(text) => {
                self.send(OutgoingMessage::text(text)).await;
                Ok(())
            }
            InputCommand::Upload(path) => self.upload(&path).await,
            InputCommand::Download { file_url, dest } => self.download(&file_url, &dest).await,
            InputCommand::Invalid(reason) => {
                println!("{}\n{}", reason, USAGE);
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!("Command failed: {}", e);
            println!("Error: {}", e);
        }
        redisplay_prompt(&self.user_id);
        Flow::Continue
    }

    async fn send(&self, draft: OutgoingMessage) {
        match self.client.send(&self.chat_id, draft).await {
            Some(sent) => print!("{}", MessageFormatter::format_sent_confirmation(&sent.created_at)),
            None => print!("{}", MessageFormatter::format_not_connected(&self.chat_id)),
        }
    }

    async fn upload(&self, path: &Path) -> Result<(), ClientError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let uploaded = self
            .client
            .upload_files(&self.chat_id, vec![UploadFile { file_name, bytes }])
            .await?;
        print!("{}", MessageFormatter::format_uploaded(&uploaded));

        for file in uploaded {
            self.send(OutgoingMessage::file(file.file_url, file.file_name))
                .await;
        }
        Ok(())
    }

    async fn download(&self, file_url: &str, dest: &Path) -> Result<(), ClientError> {
        let bytes = self.client.get_file(&self.chat_id, file_url).await?;
        tokio::fs::write(dest, &bytes).await?;
        print!(
            "{}",
            MessageFormatter::format_downloaded(bytes.len(), &dest.display().to_string())
        );
        Ok(())
    }
}
