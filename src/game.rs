use rand::{Rng, thread_rng};

pub const LOW: u32 = 1;
pub const HIGH: u32 = 100;
pub const GUESS_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    pub low: u32,
    pub high: u32,
    pub budget: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            low: LOW,
            high: HIGH,
            budget: GUESS_LIMIT,
        }
    }
}

impl GameRules {
    /// Draws a secret uniformly from `[low, high]`.
    pub fn draw_secret(&self) -> u32 {
        let mut rng = thread_rng();

        rng.gen_range(self.low..=self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_stays_in_closed_range() {
        let rules = GameRules::default();

        for _ in 0..10_000 {
            let n = rules.draw_secret();
            assert!((LOW..=HIGH).contains(&n));
        }
    }

    #[test]
    fn both_ends_are_reachable() {
        let rules = GameRules {
            low: 1,
            high: 2,
            budget: 1,
        };

        let draws: Vec<u32> = (0..1_000).map(|_| rules.draw_secret()).collect();
        assert!(draws.contains(&1));
        assert!(draws.contains(&2));
    }
}
