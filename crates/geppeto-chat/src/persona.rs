//! Personas: named, reusable system messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationPatch, Conversation, new_id};
use crate::conversations::ConversationStore;
use crate::error::{Error, Result};
use crate::store::{Record, Table};

pub const DEFAULT_PERSONA_TITLE: &str = "Golem";
pub const DEFAULT_PERSONA_INSTRUCTIONS: &str =
    "You are Golem, a large language model based assistant. Answer as concisely as possible.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub title: String,
    pub instructions: String,
}

impl Persona {
    pub fn new(title: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            instructions: instructions.into(),
        }
    }
}

impl Record for Persona {
    const ENTITY: &'static str = "persona";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Partial update of a persona
#[derive(Debug, Clone, Default)]
pub struct PersonaPatch {
    pub title: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Clone)]
pub struct PersonaStore {
    table: Arc<dyn Table<Persona>>,
}

impl PersonaStore {
    pub fn new(table: Arc<dyn Table<Persona>>) -> Self {
        Self { table }
    }

    /// Seed the default persona when the table is empty
    pub async fn init(&self) -> Result<Vec<Persona>> {
        let personas = self.list().await?;
        if !personas.is_empty() {
            return Ok(personas);
        }
        self.create(DEFAULT_PERSONA_TITLE, DEFAULT_PERSONA_INSTRUCTIONS)
            .await?;
        self.list().await
    }

    pub async fn create(
        &self,
        title: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Result<Persona> {
        let persona = Persona::new(title, instructions);
        self.table.add(persona.clone()).await?;
        Ok(persona)
    }

    /// All personas, ordered by title
    pub async fn list(&self) -> Result<Vec<Persona>> {
        let mut personas = self.table.to_array().await?;
        personas.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        Ok(personas)
    }

    pub async fn update(&self, id: &str, patch: PersonaPatch) -> Result<Persona> {
        let mut persona = self
            .table
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("persona", id))?;
        if let Some(title) = patch.title {
            persona.title = title;
        }
        if let Some(instructions) = patch.instructions {
            persona.instructions = instructions;
        }
        self.table.put(persona.clone()).await?;
        Ok(persona)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.table.delete(id).await
    }

    /// Case-insensitive lookup by title
    pub async fn find_by_title(&self, title: &str) -> Result<Option<Persona>> {
        let title = title.trim().to_lowercase();
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|p| p.title.to_lowercase() == title))
    }

    /// Use a persona's instructions as a conversation's system message
    pub async fn apply(
        &self,
        persona: &Persona,
        conversations: &ConversationStore,
        conversation_id: &str,
    ) -> Result<Conversation> {
        conversations
            .update(
                conversation_id,
                ConversationPatch::system_message(Some(persona.instructions.clone())),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTable;

    fn store() -> PersonaStore {
        PersonaStore::new(Arc::new(MemoryTable::<Persona>::new()))
    }

    #[tokio::test]
    async fn test_init_seeds_default_once() {
        let personas = store();
        let seeded = personas.init().await.unwrap();
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded[0].title, DEFAULT_PERSONA_TITLE);
        assert_eq!(personas.init().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_crud_and_lookup() {
        let personas = store();
        let pirate = personas.create("Pirate", "Talk like a pirate").await.unwrap();
        personas.create("butler", "Be formal").await.unwrap();

        let titles: Vec<_> = personas.list().await.unwrap().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["butler", "Pirate"]);

        let found = personas.find_by_title("pirate").await.unwrap().unwrap();
        assert_eq!(found.id, pirate.id);

        let updated = personas
            .update(
                &pirate.id,
                PersonaPatch {
                    instructions: Some("Arr".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Pirate");
        assert_eq!(updated.instructions, "Arr");

        personas.delete(&pirate.id).await.unwrap();
        assert!(personas.find_by_title("Pirate").await.unwrap().is_none());
        assert!(personas.update(&pirate.id, PersonaPatch::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_apply_sets_system_message() {
        let personas = store();
        let conversations = ConversationStore::in_memory();
        let conversation = conversations.ensure_active().await.unwrap();
        let persona = personas.create("Pirate", "Talk like a pirate").await.unwrap();

        let updated = personas
            .apply(&persona, &conversations, &conversation.id)
            .await
            .unwrap();
        assert_eq!(updated.system_message.as_deref(), Some("Talk like a pirate"));
        assert_eq!(
            conversations.current().unwrap().system_message.as_deref(),
            Some("Talk like a pirate")
        );
    }
}
