use serde::Serialize;
use thiserror::Error;

use crate::aggregate::percentage;
use crate::models::Reward;

#[derive(Debug, Error, PartialEq)]
pub enum RewardError {
    #[error("no reward at position {0}")]
    NotFound(usize),
    #[error("milestone must be at least one day")]
    InvalidMilestone,
    #[error("reward name is required")]
    MissingName,
}

/// Milestone rewards of one institution, kept sorted by milestone.
#[derive(Debug, Clone, Default)]
pub struct RewardBook {
    rewards: Vec<Reward>,
}

impl RewardBook {
    pub fn new(mut rewards: Vec<Reward>) -> Self {
        sort(&mut rewards);
        Self { rewards }
    }

    pub fn rewards(&self) -> &[Reward] {
        &self.rewards
    }

    pub fn add(&mut self, reward: Reward) -> Result<(), RewardError> {
        validate(&reward)?;
        self.rewards.push(reward);
        sort(&mut self.rewards);
        Ok(())
    }

    /// Replaces the entry at `index` (position in milestone order).
    pub fn edit(&mut self, index: usize, reward: Reward) -> Result<(), RewardError> {
        validate(&reward)?;
        let slot = self
            .rewards
            .get_mut(index)
            .ok_or(RewardError::NotFound(index))?;
        *slot = reward;
        sort(&mut self.rewards);
        Ok(())
    }

    pub fn delete(&mut self, index: usize) -> Result<Reward, RewardError> {
        if index >= self.rewards.len() {
            return Err(RewardError::NotFound(index));
        }
        Ok(self.rewards.remove(index))
    }
}

fn validate(reward: &Reward) -> Result<(), RewardError> {
    if reward.milestone == 0 {
        return Err(RewardError::InvalidMilestone);
    }
    if reward.reward.trim().is_empty() {
        return Err(RewardError::MissingName);
    }
    Ok(())
}

fn sort(rewards: &mut [Reward]) {
    rewards.sort_by(|a, b| a.milestone.cmp(&b.milestone));
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardProgress {
    pub streak: u32,
    pub unlocked: usize,
    pub next: Option<Reward>,
    /// Progress toward `next`; 100 once every reward is unlocked.
    pub progress_percent: u32,
}

pub fn progress(streak: u32, rewards: &[Reward]) -> RewardProgress {
    let mut sorted = rewards.to_vec();
    sort(&mut sorted);

    let unlocked = sorted.iter().filter(|r| r.milestone <= streak).count();
    let next = sorted.into_iter().find(|r| r.milestone > streak);
    let progress_percent = match &next {
        Some(next) => percentage(streak as usize, next.milestone as usize),
        None => 100,
    };

    RewardProgress {
        streak,
        unlocked,
        next,
        progress_percent,
    }
}
