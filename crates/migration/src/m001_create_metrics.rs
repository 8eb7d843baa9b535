use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_create_metrics"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

// Exactly one of the value columns is set; a key never holds both kinds.
// The statement is portable between SQLite and PostgreSQL.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    "key" VARCHAR(63) PRIMARY KEY NOT NULL,
    gauge_value DOUBLE PRECISION,
    counter_value BIGINT,
    CHECK ((counter_value IS NULL) <> (gauge_value IS NULL))
);
"#;

const DOWN_SQL: &str = "DROP TABLE IF EXISTS metrics;";
