//! Payload builder for `POST /2/tweets`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::fields::ValidationError;

pub const MAX_TEXT_CHARS: usize = 280;
pub const MAX_POLL_OPTION_CHARS: usize = 25;
pub const POLL_OPTIONS: std::ops::RangeInclusive<usize> = 2..=4;
pub const POLL_MINUTES: std::ops::RangeInclusive<u32> = 1..=10080;
pub const MEDIA_IDS: std::ops::RangeInclusive<usize> = 1..=4;

/// Who may reply, using the platform's current values (`everyone`,
/// `mentionedUsers`, `following`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplySettings {
    Everyone,
    MentionedUsers,
    Following,
}

impl ReplySettings {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::MentionedUsers => "mentionedUsers",
            Self::Following => "following",
        }
    }
}

impl fmt::Display for ReplySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplySettings {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "everyone" => Ok(Self::Everyone),
            "mentionedUsers" => Ok(Self::MentionedUsers),
            "following" => Ok(Self::Following),
            other => Err(ValidationError::InvalidReplySettings(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub options: Vec<String>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geo {
    pub place_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub media_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tagged_user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub in_reply_to_tweet_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_reply_user_ids: Vec<String>,
}

/// A tweet under construction. Setters validate on the spot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetDraft {
    #[serde(skip)]
    auto_truncate: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_settings: Option<ReplySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    poll: Option<Poll>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geo: Option<Geo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_tweet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    for_super_followers_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    direct_message_deep_link: Option<String>,
}

impl TweetDraft {
    /// With `auto_truncate`, over-long text is cut to the limit instead of
    /// rejected.
    pub fn new(auto_truncate: bool) -> Self {
        Self {
            auto_truncate,
            ..Self::default()
        }
    }

    pub fn text(mut self, text: &str) -> Result<Self, ValidationError> {
        let len = text.chars().count();
        if len > MAX_TEXT_CHARS && !self.auto_truncate {
            return Err(ValidationError::TextTooLong {
                len,
                max: MAX_TEXT_CHARS,
            });
        }
        self.text = Some(text.chars().take(MAX_TEXT_CHARS).collect());
        Ok(self)
    }

    pub fn reply_settings(mut self, settings: ReplySettings) -> Self {
        self.reply_settings = Some(settings);
        self
    }

    /// Options longer than 25 characters are truncated.
    pub fn poll<S: AsRef<str>>(
        mut self,
        options: &[S],
        duration_minutes: u32,
    ) -> Result<Self, ValidationError> {
        if !POLL_OPTIONS.contains(&options.len()) {
            return Err(ValidationError::PollOptions(options.len()));
        }
        if !POLL_MINUTES.contains(&duration_minutes) {
            return Err(ValidationError::OutOfRange {
                field: "duration_minutes",
                min: i64::from(*POLL_MINUTES.start()),
                max: i64::from(*POLL_MINUTES.end()),
                value: i64::from(duration_minutes),
            });
        }
        self.poll = Some(Poll {
            options: options
                .iter()
                .map(|o| o.as_ref().chars().take(MAX_POLL_OPTION_CHARS).collect())
                .collect(),
            duration_minutes,
        });
        Ok(self)
    }

    pub fn geo(mut self, place_id: &str) -> Self {
        self.geo = Some(Geo {
            place_id: place_id.to_string(),
        });
        self
    }

    pub fn media(
        mut self,
        media_ids: Vec<String>,
        tagged_user_ids: Vec<String>,
    ) -> Result<Self, ValidationError> {
        if !MEDIA_IDS.contains(&media_ids.len()) {
            return Err(ValidationError::MediaCount(media_ids.len()));
        }
        self.media = Some(MediaAttachment {
            media_ids,
            tagged_user_ids,
        });
        Ok(self)
    }

    pub fn quote_tweet_id(mut self, tweet_id: &str) -> Self {
        self.quote_tweet_id = Some(tweet_id.to_string());
        self
    }

    pub fn reply(mut self, in_reply_to_tweet_id: &str, exclude_reply_user_ids: Vec<String>) -> Self {
        self.reply = Some(Reply {
            in_reply_to_tweet_id: in_reply_to_tweet_id.to_string(),
            exclude_reply_user_ids,
        });
        self
    }

    pub fn for_super_followers_only(mut self, only: bool) -> Self {
        self.for_super_followers_only = Some(only);
        self
    }

    pub fn direct_message_deep_link(mut self, link: &str) -> Self {
        self.direct_message_deep_link = Some(link.to_string());
        self
    }

    pub fn text_value(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Request body with unset parts left out.
    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
