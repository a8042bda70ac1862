use std::collections::HashMap;

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::quest::{ItemReward, ProgressRecord, QuestId};

/// SQLite store for per-event quest state and reward sets.
///
/// Progress, acceptance, completion and claims are written through on every
/// transition so a process restart picks up where players left off. All keys
/// carry the event id, so one database serves concurrent events.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_quest_progress (
                event TEXT NOT NULL,
                player_id TEXT NOT NULL,
                quest_id INTEGER NOT NULL,
                amount INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY(event, player_id, quest_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_quest_accepted (
                event TEXT NOT NULL,
                player_id TEXT NOT NULL,
                quest_id INTEGER NOT NULL,
                accepted_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY(event, player_id, quest_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_quest_completed (
                event TEXT NOT NULL,
                player_id TEXT NOT NULL,
                quest_id INTEGER NOT NULL,
                completed_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY(event, player_id, quest_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_quest_claimed (
                event TEXT NOT NULL,
                player_id TEXT NOT NULL,
                quest_id INTEGER NOT NULL,
                claimed_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY(event, player_id, quest_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_quest_rewards (
                event TEXT NOT NULL,
                quest_id INTEGER NOT NULL,
                rewards_json TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY(event, quest_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    pub async fn upsert_progress(
        &self,
        event: &str,
        player_id: &str,
        quest_id: QuestId,
        amount: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO event_quest_progress (event, player_id, quest_id, amount)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(event, player_id, quest_id)
            DO UPDATE SET amount = excluded.amount, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(event)
        .bind(player_id)
        .bind(quest_id as i64)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_accepted(
        &self,
        event: &str,
        player_id: &str,
        quest_id: QuestId,
    ) -> Result<(), sqlx::Error> {
        self.mark_flag("event_quest_accepted", event, player_id, quest_id)
            .await
    }

    pub async fn mark_completed(
        &self,
        event: &str,
        player_id: &str,
        quest_id: QuestId,
    ) -> Result<(), sqlx::Error> {
        self.mark_flag("event_quest_completed", event, player_id, quest_id)
            .await
    }

    pub async fn mark_claimed(
        &self,
        event: &str,
        player_id: &str,
        quest_id: QuestId,
    ) -> Result<(), sqlx::Error> {
        self.mark_flag("event_quest_claimed", event, player_id, quest_id)
            .await
    }

    async fn mark_flag(
        &self,
        table: &str,
        event: &str,
        player_id: &str,
        quest_id: QuestId,
    ) -> Result<(), sqlx::Error> {
        // Table names come from the three constants above, never from input.
        let sql = format!(
            "INSERT OR REPLACE INTO {} (event, player_id, quest_id) VALUES (?, ?, ?)",
            table
        );
        sqlx::query(&sql)
            .bind(event)
            .bind(player_id)
            .bind(quest_id as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Everything known about one player in one event, assembled from the
    /// four tables.
    pub async fn load_player_progress(
        &self,
        event: &str,
        player_id: &str,
    ) -> Result<HashMap<QuestId, ProgressRecord>, sqlx::Error> {
        let mut records: HashMap<QuestId, ProgressRecord> = HashMap::new();

        let rows = sqlx::query(
            "SELECT quest_id, amount FROM event_quest_progress WHERE event = ? AND player_id = ?",
        )
        .bind(event)
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let quest_id: i64 = row.get("quest_id");
            records.entry(quest_id as QuestId).or_default().amount = row.get("amount");
        }

        for (table, set) in [
            ("event_quest_accepted", 0),
            ("event_quest_completed", 1),
            ("event_quest_claimed", 2),
        ] {
            let sql = format!(
                "SELECT quest_id FROM {} WHERE event = ? AND player_id = ?",
                table
            );
            let rows = sqlx::query(&sql)
                .bind(event)
                .bind(player_id)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                let quest_id: i64 = row.get("quest_id");
                let record = records.entry(quest_id as QuestId).or_default();
                match set {
                    0 => record.accepted = true,
                    1 => record.completed = true,
                    _ => record.claimed = true,
                }
            }
        }

        Ok(records)
    }

    /// Reward sets for every quest of an event.
    pub async fn load_rewards(
        &self,
        event: &str,
    ) -> Result<HashMap<QuestId, Vec<ItemReward>>, sqlx::Error> {
        let rows =
            sqlx::query("SELECT quest_id, rewards_json FROM event_quest_rewards WHERE event = ?")
                .bind(event)
                .fetch_all(&self.pool)
                .await?;

        let mut rewards = HashMap::new();
        for row in rows {
            let quest_id: i64 = row.get("quest_id");
            let json: String = row.get("rewards_json");
            let items: Vec<ItemReward> = serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Bad rewards_json for quest {}: {}", quest_id, e);
                Vec::new()
            });
            rewards.insert(quest_id as QuestId, items);
        }

        Ok(rewards)
    }

    pub async fn set_rewards(
        &self,
        event: &str,
        quest_id: QuestId,
        rewards: &[ItemReward],
    ) -> Result<(), sqlx::Error> {
        let json = serde_json::to_string(rewards).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            r#"
            INSERT INTO event_quest_rewards (event, quest_id, rewards_json)
            VALUES (?, ?, ?)
            ON CONFLICT(event, quest_id) DO UPDATE SET rewards_json = excluded.rewards_json
            "#,
        )
        .bind(event)
        .bind(quest_id as i64)
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_db(dir: &TempDir) -> Database {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        Database::new(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_progress_upsert_and_load() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;

        db.upsert_progress("full_moon", "p1", 1, 3).await.unwrap();
        db.upsert_progress("full_moon", "p1", 1, 5).await.unwrap();
        db.mark_accepted("full_moon", "p1", 1).await.unwrap();
        db.mark_completed("full_moon", "p1", 1).await.unwrap();

        let records = db.load_player_progress("full_moon", "p1").await.unwrap();
        let record = records.get(&1).unwrap();
        assert_eq!(record.amount, 5);
        assert!(record.accepted);
        assert!(record.completed);
        assert!(!record.claimed);

        // other players and other events are untouched
        assert!(db.load_player_progress("full_moon", "p2").await.unwrap().is_empty());
        assert!(db.load_player_progress("winter", "p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewards_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;

        let rewards = vec![
            ItemReward {
                item_id: "moon_shard".to_string(),
                count: 3,
            },
            ItemReward {
                item_id: "silver_coin".to_string(),
                count: 50,
            },
        ];
        db.set_rewards("full_moon", 1, &rewards).await.unwrap();

        let loaded = db.load_rewards("full_moon").await.unwrap();
        assert_eq!(loaded.get(&1).unwrap(), &rewards);

        // replacing the set keeps exactly one row
        db.set_rewards("full_moon", 1, &rewards[..1]).await.unwrap();
        let loaded = db.load_rewards("full_moon").await.unwrap();
        assert_eq!(loaded.get(&1).unwrap().len(), 1);
    }
}
