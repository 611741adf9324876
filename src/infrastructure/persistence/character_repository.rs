//! SQLite mirror of the externally-owned character store
//!
//! The approval workflow owns these rows; this core reads them and writes
//! only the active adapter reference. `upsert` exists for synchronizing
//! from the owning system and for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::application::ports::outbound::CharacterStorePort;
use crate::domain::entities::{CharacterAttributes, CharacterIdentity, Gender};
use crate::domain::value_objects::{AdapterId, CharacterId};

pub struct SqliteCharacterRepository {
    pool: SqlitePool,
}

impl SqliteCharacterRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS characters (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                gender TEXT NOT NULL,
                canonical_age INTEGER,
                approved_tags TEXT,
                approved_seed INTEGER,
                reference_image TEXT,
                active_adapter_id TEXT,
                attributes TEXT NOT NULL DEFAULT '{}'
            )
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn upsert(&self, character: &CharacterIdentity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO characters
                (id, name, slug, gender, canonical_age, approved_tags, approved_seed,
                 reference_image, active_adapter_id, attributes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(character.id.to_string())
        .bind(&character.name)
        .bind(&character.slug)
        .bind(character.gender.to_string())
        .bind(character.canonical_age.map(|a| a as i64))
        .bind(&character.approved_tags)
        .bind(character.approved_seed)
        .bind(&character.reference_image)
        .bind(character.active_adapter_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&character.attributes)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

type CharacterRow = (
    String,         // id
    String,         // name
    String,         // slug
    String,         // gender
    Option<i64>,    // canonical_age
    Option<String>, // approved_tags
    Option<i64>,    // approved_seed
    Option<String>, // reference_image
    Option<String>, // active_adapter_id
    String,         // attributes
);

fn character_from(row: CharacterRow) -> Result<CharacterIdentity> {
    let (id, name, slug, gender, age, tags, seed, reference, adapter, attributes) = row;
    let gender = match gender.as_str() {
        "female" => Gender::Female,
        "male" => Gender::Male,
        "nonbinary" => Gender::Nonbinary,
        other => return Err(anyhow!("unknown gender {other:?}")),
    };
    let attributes: CharacterAttributes = serde_json::from_str(&attributes)
        .map_err(|e| anyhow!("bad attributes for {slug}: {e}"))?;
    Ok(CharacterIdentity {
        id: id.parse().map_err(|e| anyhow!("bad character id {id:?}: {e}"))?,
        name,
        slug,
        gender,
        canonical_age: age.map(|a| a as u8),
        approved_tags: tags,
        approved_seed: seed,
        reference_image: reference,
        active_adapter_id: adapter
            .map(|a| a.parse::<AdapterId>().map_err(|e| anyhow!("bad adapter id {a:?}: {e}")))
            .transpose()?,
        attributes,
    })
}

#[async_trait]
impl CharacterStorePort for SqliteCharacterRepository {
    async fn get(&self, id: CharacterId) -> Result<Option<CharacterIdentity>> {
        let row: Option<CharacterRow> = sqlx::query_as(
            "SELECT id, name, slug, gender, canonical_age, approved_tags, approved_seed,
                    reference_image, active_adapter_id, attributes
             FROM characters WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(character_from).transpose()
    }

    async fn set_active_adapter(&self, id: CharacterId, adapter_id: AdapterId) -> Result<()> {
        sqlx::query("UPDATE characters SET active_adapter_id = ? WHERE id = ?")
            .bind(adapter_id.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_active_adapter(&self, id: CharacterId) -> Result<()> {
        sqlx::query("UPDATE characters SET active_adapter_id = NULL WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
