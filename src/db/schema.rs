//! Table and column definitions of the persisted layout.
//!
//! Every table and column here is read by the bot's handlers, so renaming or
//! dropping anything is a breaking change. Schema evolution is additive only.

/// A table that may have to be created on an existing database.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub create: &'static str,
    /// Statements run right after the table is created (indexes).
    pub follow_up: &'static [&'static str],
}

/// A column introduced after its table was first shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table: &'static str,
    pub name: &'static str,
    /// Type, default and nullability as written after the column name.
    pub definition: &'static str,
}

impl ColumnSpec {
    pub const fn new(table: &'static str, name: &'static str, definition: &'static str) -> Self {
        Self {
            table,
            name,
            definition,
        }
    }

    pub fn add_if_missing_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
            self.table, self.name, self.definition
        )
    }

    pub fn add_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table, self.name, self.definition
        )
    }
}

pub const USERS: TableSpec = TableSpec {
    name: "users",
    create: r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id BIGINT PRIMARY KEY,
            username VARCHAR(255),
            first_name VARCHAR(255),
            last_name VARCHAR(255),
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
    "#,
    follow_up: &[],
};

pub const ENDED_CHATS: TableSpec = TableSpec {
    name: "ended_chats",
    create: r#"
        CREATE TABLE IF NOT EXISTS ended_chats (
            chat_id INTEGER PRIMARY KEY,
            user_id_1 BIGINT REFERENCES users(user_id),
            user_id_2 BIGINT REFERENCES users(user_id),
            started_at TIMESTAMP,
            ended_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
    "#,
    follow_up: &[],
};

pub const ACTIVE_CHATS: TableSpec = TableSpec {
    name: "active_chats",
    create: r#"
        CREATE TABLE IF NOT EXISTS active_chats (
            chat_id SERIAL PRIMARY KEY,
            user_id_1 BIGINT REFERENCES users(user_id),
            user_id_2 BIGINT REFERENCES users(user_id),
            started_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(user_id_1),
            UNIQUE(user_id_2)
        )
    "#,
    follow_up: &[],
};

pub const MESSAGES: TableSpec = TableSpec {
    name: "messages",
    create: r#"
        CREATE TABLE IF NOT EXISTS messages (
            id SERIAL PRIMARY KEY,
            chat_id INTEGER,
            sender_id BIGINT REFERENCES users(user_id),
            content TEXT,
            message_type VARCHAR(20) DEFAULT 'text',
            file_id TEXT,
            local_file_path TEXT,
            file_content BYTEA,
            file_name TEXT,
            mime_type TEXT,
            sent_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (chat_id) REFERENCES active_chats(chat_id) ON DELETE SET NULL
        )
    "#,
    follow_up: &["CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id)"],
};

pub const USER_STATE: TableSpec = TableSpec {
    name: "user_state",
    create: r#"
        CREATE TABLE IF NOT EXISTS user_state (
            user_id BIGINT PRIMARY KEY REFERENCES users(user_id),
            is_searching BOOLEAN DEFAULT FALSE,
            main_message_id BIGINT,
            pin_message_id BIGINT,
            profile_setup_state VARCHAR(32) DEFAULT 'none',
            profile_setup_step INTEGER DEFAULT 0,
            last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
    "#,
    follow_up: &[
        "CREATE INDEX IF NOT EXISTS idx_user_state_searching ON user_state(is_searching, last_updated)",
    ],
};

pub const USER_PROFILES: TableSpec = TableSpec {
    name: "user_profiles",
    create: r#"
        CREATE TABLE IF NOT EXISTS user_profiles (
            user_id BIGINT PRIMARY KEY REFERENCES users(user_id),
            gender VARCHAR(16),
            looking_for VARCHAR(16),
            age INTEGER,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
    "#,
    follow_up: &[],
};

pub const INTERESTS: TableSpec = TableSpec {
    name: "interests",
    create: r#"
        CREATE TABLE IF NOT EXISTS interests (
            id SERIAL PRIMARY KEY,
            name VARCHAR(64) UNIQUE NOT NULL
        )
    "#,
    follow_up: &[],
};

pub const USER_INTERESTS: TableSpec = TableSpec {
    name: "user_interests",
    create: r#"
        CREATE TABLE IF NOT EXISTS user_interests (
            user_id BIGINT REFERENCES users(user_id),
            interest_id INTEGER REFERENCES interests(id),
            PRIMARY KEY (user_id, interest_id)
        )
    "#,
    follow_up: &[
        "CREATE INDEX IF NOT EXISTS idx_user_interests_interest ON user_interests(interest_id)",
    ],
};

pub const USER_RATINGS: TableSpec = TableSpec {
    name: "user_ratings",
    create: r#"
        CREATE TABLE IF NOT EXISTS user_ratings (
            id SERIAL PRIMARY KEY,
            chat_id INTEGER,
            rater_id BIGINT REFERENCES users(user_id),
            rated_user_id BIGINT REFERENCES users(user_id),
            rating_type VARCHAR(16) NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
    "#,
    follow_up: &[
        "CREATE INDEX IF NOT EXISTS idx_user_ratings_rated ON user_ratings(rated_user_id)",
    ],
};

/// Creation order respects foreign keys.
pub const ALL_TABLES: &[TableSpec] = &[
    USERS,
    ENDED_CHATS,
    ACTIVE_CHATS,
    MESSAGES,
    USER_STATE,
    USER_PROFILES,
    INTERESTS,
    USER_INTERESTS,
    USER_RATINGS,
];

pub const MESSAGE_MEDIA_STORAGE: &[ColumnSpec] = &[
    ColumnSpec::new("messages", "file_content", "BYTEA"),
    ColumnSpec::new("messages", "file_name", "TEXT"),
    ColumnSpec::new("messages", "mime_type", "TEXT"),
];

pub const MESSAGE_MEDIA_TYPE: &[ColumnSpec] = &[
    ColumnSpec::new("messages", "message_type", "VARCHAR(20) DEFAULT 'text'"),
    ColumnSpec::new("messages", "file_id", "TEXT"),
];

pub const MESSAGE_LOCAL_FILE: &[ColumnSpec] = &[ColumnSpec::new("messages", "local_file_path", "TEXT")];

pub const USER_STATE_PROFILE_SETUP: &[ColumnSpec] = &[
    ColumnSpec::new("user_state", "profile_setup_state", "VARCHAR(32) DEFAULT 'none'"),
    ColumnSpec::new("user_state", "profile_setup_step", "INTEGER DEFAULT 0"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_statements() {
        let col = ColumnSpec::new("messages", "file_id", "TEXT");
        assert_eq!(
            col.add_if_missing_sql(),
            "ALTER TABLE messages ADD COLUMN IF NOT EXISTS file_id TEXT"
        );
        assert_eq!(col.add_sql(), "ALTER TABLE messages ADD COLUMN file_id TEXT");
    }

    #[test]
    fn test_tables_are_created_after_their_references() {
        let position = |name: &str| ALL_TABLES.iter().position(|t| t.name == name).unwrap();
        assert!(position("users") < position("active_chats"));
        assert!(position("active_chats") < position("messages"));
        assert!(position("interests") < position("user_interests"));
    }

    #[test]
    fn test_create_statements_are_idempotent() {
        for table in ALL_TABLES {
            assert!(table.create.contains("IF NOT EXISTS"), "{} must be re-runnable", table.name);
            assert!(table.create.contains(table.name));
            for stmt in table.follow_up {
                assert!(stmt.contains("IF NOT EXISTS"));
            }
        }
    }

    #[test]
    fn test_migrated_columns_exist_in_create_statements() {
        let columns = MESSAGE_MEDIA_STORAGE
            .iter()
            .chain(MESSAGE_MEDIA_TYPE)
            .chain(MESSAGE_LOCAL_FILE)
            .chain(USER_STATE_PROFILE_SETUP);
        for column in columns {
            let table = ALL_TABLES.iter().find(|t| t.name == column.table).unwrap();
            assert!(
                table.create.contains(column.name),
                "{}.{} missing from fresh schema",
                column.table,
                column.name
            );
        }
    }
}
