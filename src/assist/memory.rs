use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::RwLock;

use super::{unix_now, Chat, ChatMessage, ChatStore, Role};

/// `ChatStore` kept in process memory. Used by tests and the demo.
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<String, Chat>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_chat(&self, title: &str) -> Result<Chat> {
        let chat = Chat {
            id: new_id(),
            title: title.to_string(),
            created_at: unix_now(),
            messages: Vec::new(),
        };
        self.chats.write().await.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        Ok(self.chats.read().await.get(chat_id).cloned())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = self.chats.read().await.values().cloned().collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(chats)
    }

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<()> {
        let mut chats = self.chats.write().await;
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| anyhow!("chat {} not found", chat_id))?;
        chat.title = title.to_string();
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        Ok(self.chats.write().await.remove(chat_id).is_some())
    }

    async fn add_message(&self, chat_id: &str, role: Role, content: &str) -> Result<ChatMessage> {
        let mut chats = self.chats.write().await;
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| anyhow!("chat {} not found", chat_id))?;
        let message = ChatMessage {
            id: new_id(),
            chat_id: chat_id.to_string(),
            role,
            content: content.to_string(),
            created_at: unix_now(),
        };
        chat.messages.push(message.clone());
        Ok(message)
    }

    async fn update_message(&self, chat_id: &str, message_id: &str, content: &str) -> Result<()> {
        let mut chats = self.chats.write().await;
        let message = chats
            .get_mut(chat_id)
            .and_then(|chat| chat.messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| anyhow!("message {} not found in chat {}", message_id, chat_id))?;
        message.content = content.to_string();
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        let mut chats = self.chats.write().await;
        let Some(chat) = chats.get_mut(chat_id) else {
            return Ok(false);
        };
        let before = chat.messages.len();
        chat.messages.retain(|m| m.id != message_id);
        Ok(chat.messages.len() != before)
    }
}
