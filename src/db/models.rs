use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

use crate::error::DatabaseError;

/// Telegram users are identified by their numeric platform id.
pub type UserId = i64;
pub type ChatId = i32;
pub type MessageId = i32;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl User {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            username: None,
            first_name: None,
            last_name: None,
            created_at: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_names(mut self, first_name: Option<String>, last_name: Option<String>) -> Self {
        self.first_name = first_name;
        self.last_name = last_name;
        self
    }
}

/// An active chat seen from one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveChat {
    pub chat_id: ChatId,
    pub partner_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, FromRow)]
pub struct ChatPair {
    pub chat_id: ChatId,
    pub user_id_1: UserId,
    pub user_id_2: UserId,
}

impl ChatPair {
    /// Returns the other participant, or `None` if `user_id` is not part of the chat.
    pub fn partner_of(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.user_id_1 {
            Some(self.user_id_2)
        } else if user_id == self.user_id_2 {
            Some(self.user_id_1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EndedChat {
    pub chat_id: ChatId,
    pub user_id_1: Option<UserId>,
    pub user_id_2: Option<UserId>,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $column:literal {
            $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub(crate) fn decode(value: &str) -> Result<Self, DatabaseError> {
                value.parse().map_err(|_| DatabaseError::Decode {
                    column: $column.to_string(),
                    value: value.to_string(),
                })
            }
        }

        impl FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text $(| $alias)* => Ok($name::$variant),)+
                    other => Err(DatabaseError::Validation(format!(
                        "unknown {} '{}'",
                        $column, other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Kind of content a message carries. Stored in `messages.message_type`.
    MessageKind, "message_type" {
        Text => "text",
        Photo => "photo",
        Video => "video",
        Voice => "voice",
        Audio => "audio",
        Document => "document",
        Sticker => "sticker",
        VideoNote => "video_note",
        Animation => "animation",
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

string_enum! {
    Gender, "gender" {
        Male => "male",
        Female => "female",
        Other => "other",
    }
}

string_enum! {
    /// Which gender a user wants to be matched with.
    LookingFor, "looking_for" {
        Male => "male",
        Female => "female",
        All => "all" | "any",
    }
}

string_enum! {
    /// Position of a user in the profile setup / edit dialog.
    ProfileSetupState, "profile_setup_state" {
        None => "none",
        Gender => "gender",
        LookingFor => "looking_for",
        Age => "age",
        Interests => "interests",
        Complete => "complete",
        EditGender => "edit_gender",
        EditLookingFor => "edit_looking_for",
        EditAge => "edit_age",
        EditInterests => "edit_interests",
    }
}

impl Default for ProfileSetupState {
    fn default() -> Self {
        ProfileSetupState::None
    }
}

string_enum! {
    /// Reaction left for a chat partner after a chat ends.
    RatingKind, "rating_type" {
        Kiss => "kiss",
        Money => "money",
        Clown => "clown",
    }
}

/// A message to be appended to a chat.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub file_id: Option<String>,
    pub local_file_path: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_content: Option<Vec<u8>>,
}

impl NewMessage {
    pub fn text(chat_id: ChatId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id,
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn media(chat_id: ChatId, sender_id: UserId, kind: MessageKind) -> Self {
        Self {
            chat_id,
            sender_id,
            kind,
            ..Default::default()
        }
    }

    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.content = Some(caption.into());
        self
    }

    pub fn file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn local_file(mut self, path: impl Into<String>) -> Self {
        self.local_file_path = Some(path.into());
        self
    }

    pub fn inline_media(
        mut self,
        bytes: Vec<u8>,
        file_name: Option<String>,
        mime_type: Option<String>,
    ) -> Self {
        self.file_content = Some(bytes);
        self.file_name = file_name;
        self.mime_type = mime_type;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: Option<ChatId>,
    pub sender_id: Option<UserId>,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub file_id: Option<String>,
    pub local_file_path: Option<String>,
    #[serde(skip)]
    pub file_content: Option<Vec<u8>>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub sent_at: Option<NaiveDateTime>,
}

impl Message {
    pub fn has_media(&self) -> bool {
        self.file_content.is_some() || self.file_id.is_some()
    }
}

fn decode_error(column: &str, err: DatabaseError) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    }
}

impl<'r> FromRow<'r, PgRow> for Message {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: Option<String> = row.try_get("message_type")?;
        let kind = match kind {
            Some(kind) => {
                MessageKind::decode(&kind).map_err(|e| decode_error("message_type", e))?
            }
            None => MessageKind::Text,
        };

        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            sender_id: row.try_get("sender_id")?,
            content: row.try_get("content")?,
            kind,
            file_id: row.try_get("file_id")?,
            local_file_path: row.try_get("local_file_path")?,
            file_content: row.try_get("file_content")?,
            file_name: row.try_get("file_name")?,
            mime_type: row.try_get("mime_type")?,
            sent_at: row.try_get("sent_at")?,
        })
    }
}

/// Media payload stored inline with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaContent {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub gender: Option<Gender>,
    pub looking_for: Option<LookingFor>,
    pub age: Option<i32>,
}

impl<'r> FromRow<'r, PgRow> for UserProfile {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let gender: Option<String> = row.try_get("gender")?;
        let looking_for: Option<String> = row.try_get("looking_for")?;

        Ok(Self {
            user_id: row.try_get("user_id")?,
            gender: gender
                .as_deref()
                .map(Gender::decode)
                .transpose()
                .map_err(|e| decode_error("gender", e))?,
            looking_for: looking_for
                .as_deref()
                .map(LookingFor::decode)
                .transpose()
                .map_err(|e| decode_error("looking_for", e))?,
            age: row.try_get("age")?,
        })
    }
}

/// Partial profile update: `None` fields keep their stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub gender: Option<Gender>,
    pub looking_for: Option<LookingFor>,
    pub age: Option<i32>,
}

impl ProfileUpdate {
    pub fn gender(gender: Gender) -> Self {
        Self {
            gender: Some(gender),
            ..Default::default()
        }
    }

    pub fn looking_for(looking_for: LookingFor) -> Self {
        Self {
            looking_for: Some(looking_for),
            ..Default::default()
        }
    }

    pub fn age(age: i32) -> Self {
        Self {
            age: Some(age),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gender.is_none() && self.looking_for.is_none() && self.age.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SetupProgress {
    pub state: ProfileSetupState,
    pub step: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RatingSummary {
    pub kiss: i64,
    pub money: i64,
    pub clown: i64,
}

impl RatingSummary {
    /// Builds a summary from `(rating_type, count)` rows. Unknown kinds are ignored.
    pub fn from_counts<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let mut summary = RatingSummary::default();
        for (kind, count) in rows {
            match kind.as_ref().parse::<RatingKind>() {
                Ok(kind) => *summary.slot(kind) += count,
                Err(_) => tracing::warn!(rating_type = kind.as_ref(), "Ignoring unknown rating type"),
            }
        }
        summary
    }

    pub fn get(&self, kind: RatingKind) -> i64 {
        match kind {
            RatingKind::Kiss => self.kiss,
            RatingKind::Money => self.money,
            RatingKind::Clown => self.clown,
        }
    }

    pub fn total(&self) -> i64 {
        self.kiss + self.money + self.clown
    }

    fn slot(&mut self, kind: RatingKind) -> &mut i64 {
        match kind {
            RatingKind::Kiss => &mut self.kiss,
            RatingKind::Money => &mut self.money,
            RatingKind::Clown => &mut self.clown,
        }
    }
}
