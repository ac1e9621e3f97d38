//! Core domain model for the HackMyVM client.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "hmv-core";

pub const SITE_ORIGIN: &str = "https://hackmyvm.eu";
pub const DOWNLOADS_ORIGIN: &str = "https://downloads.hackmyvm.eu";

/// Substring that only appears in pages rendered for a logged-in user.
pub const AUTH_MARKER: &str = "Logout";

/// Account credentials as written by `hmv config`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Serialized transport state for a logged-in session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Cookie header value (`name=value; name2=value2`) scoped to the site origin.
    pub cookies: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Unknown,
}

impl Difficulty {
    /// Maps the listing's `border-top` colour to a difficulty.
    pub fn from_border_color(color: &str) -> Self {
        match color.trim().to_ascii_lowercase().as_str() {
            "#28a745" => Self::Easy,
            "#ffc107" => Self::Medium,
            "#dc3545" => Self::Hard,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown difficulty `{other}`")),
        }
    }
}

/// One row of a machine listing page. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub name: String,
    pub difficulty: Difficulty,
    pub platform: String,
    pub author: String,
    pub size: String,
    pub status: String,
}

impl MachineRecord {
    /// Lowercased name with spaces replaced, as used in image and package paths.
    pub fn slug(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }

    pub fn image_url(&self) -> String {
        format!("{SITE_ORIGIN}/img/vm/{}.png", self.slug())
    }

    pub fn page_url(&self) -> String {
        format!("{SITE_ORIGIN}/machines/machine.php?vm={}", self.name)
    }

    pub fn download_url(&self) -> String {
        format!("{DOWNLOADS_ORIGIN}/{}.zip", self.slug())
    }

    pub fn is_hacked(&self) -> bool {
        !self.status.contains("TO HACK")
    }
}

/// Export row; field order is the export column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedMachine {
    pub id: u64,
    pub image: String,
    pub machine_url: String,
    pub download_url: String,
    pub name: String,
    pub difficulty: Difficulty,
    pub author: String,
    pub platform: String,
    pub size: String,
    pub status: String,
}

impl ExportedMachine {
    /// Numbers machines so the first listed (most recent) gets the highest id.
    pub fn number_listing(machines: &[MachineRecord]) -> Vec<Self> {
        let total = machines.len() as u64;
        machines
            .iter()
            .enumerate()
            .map(|(idx, machine)| Self {
                id: total - idx as u64,
                image: machine.image_url(),
                machine_url: machine.page_url(),
                download_url: machine.download_url(),
                name: machine.name.clone(),
                difficulty: machine.difficulty,
                author: machine.author.clone(),
                platform: machine.platform.clone(),
                size: machine.size.clone(),
                status: machine.status.clone(),
            })
            .collect()
    }
}

/// One solved-machine entry from the public achievement dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub id: u64,
    pub nickname: String,
    pub date: String,
    pub vm_title: String,
    pub difficulty: String,
    pub rank: String,
}

impl AchievementRecord {
    pub fn rank_tier(&self) -> RankTier {
        RankTier::from_rank(&self.rank)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankTier {
    Author,
    First,
    Top3,
    Other(u32),
    Unranked,
}

impl RankTier {
    pub fn from_rank(rank: &str) -> Self {
        let rank = rank.trim();
        if rank.is_empty() || !rank.chars().all(|c| c.is_ascii_digit()) {
            return Self::Unranked;
        }
        match rank.parse::<u32>() {
            Ok(1) => Self::Author,
            Ok(2) => Self::First,
            Ok(3..=4) => Self::Top3,
            Ok(n) => Self::Other(n),
            Err(_) => Self::Unranked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteupRecord {
    #[serde(rename = "vmname")]
    pub vm_title: String,
    pub author: String,
    pub language: String,
    #[serde(rename = "writeup")]
    pub writeup_url: String,
}
