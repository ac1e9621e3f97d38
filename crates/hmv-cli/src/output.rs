//! Terminal tables for the search, writeup and stats views.

use hmv_core::{AchievementRecord, MachineRecord, RankTier, WriteupRecord};
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Tabled)]
pub struct MachineRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Creator")]
    creator: String,
    #[tabled(rename = "Link")]
    link: String,
}

impl From<&MachineRecord> for MachineRow {
    fn from(machine: &MachineRecord) -> Self {
        Self {
            name: machine.name.clone(),
            level: machine.difficulty.to_string(),
            status: machine.status.clone(),
            creator: machine.author.clone(),
            link: machine.page_url(),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct WriteupRow {
    #[tabled(rename = "Machine")]
    machine: String,
    #[tabled(rename = "Author")]
    author: String,
    #[tabled(rename = "Language")]
    language: String,
    #[tabled(rename = "Writeup Link")]
    link: String,
}

impl From<WriteupRecord> for WriteupRow {
    fn from(writeup: WriteupRecord) -> Self {
        Self {
            machine: writeup.vm_title,
            author: writeup.author,
            language: writeup.language,
            link: writeup.writeup_url,
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct AchievementRow {
    #[tabled(rename = "Nickname")]
    nickname: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "VM Title")]
    vm_title: String,
    #[tabled(rename = "Difficulty")]
    difficulty: String,
    #[tabled(rename = "Rank")]
    rank: String,
    #[tabled(rename = "ID")]
    id: u64,
}

impl From<&AchievementRecord> for AchievementRow {
    fn from(record: &AchievementRecord) -> Self {
        let rank = match record.rank_tier() {
            RankTier::Author => format!("{} (author)", record.rank),
            RankTier::First => format!("{} (first)", record.rank),
            _ => record.rank.clone(),
        };
        Self {
            nickname: record.nickname.clone(),
            date: record.date.clone(),
            vm_title: record.vm_title.clone(),
            difficulty: record.difficulty.clone(),
            rank,
            id: record.id,
        }
    }
}

pub fn render<R: Tabled>(rows: impl IntoIterator<Item = R>) -> String {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

pub fn heading(title: &str) {
    println!("\n{title}");
    println!("{}", "=".repeat(title.chars().count()));
}
