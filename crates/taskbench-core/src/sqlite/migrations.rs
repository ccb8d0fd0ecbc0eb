#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_results_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS task_results (
    ident TEXT PRIMARY KEY,
    passed INTEGER NOT NULL,
    recorded_at_unix INTEGER NOT NULL
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS task_results;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_result_categories",
    up_sql: r#"
ALTER TABLE task_results ADD COLUMN category TEXT;

CREATE INDEX IF NOT EXISTS idx_task_results_category
    ON task_results (category, ident);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_task_results_category;
ALTER TABLE task_results DROP COLUMN category;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
