use serde::{Deserialize, Serialize};

use super::market::LiquidationEvent;

/// Execution mode. Paper synthesizes fills locally; live signs venue orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Some(TradingMode::Paper),
            "live" => Some(TradingMode::Live),
            _ => None,
        }
    }
}

/// Lifecycle state of the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotState {
    Booting,
    Running,
    PausedManual,
    PausedRiskLimit,
    Error,
    Shutdown,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotState::Booting => "BOOTING",
            BotState::Running => "RUNNING",
            BotState::PausedManual => "PAUSED_MANUAL",
            BotState::PausedRiskLimit => "PAUSED_RISK_LIMIT",
            BotState::Error => "ERROR",
            BotState::Shutdown => "SHUTDOWN",
        }
    }

    /// Whether new entries may be evaluated in this state.
    pub fn accepts_entries(&self) -> bool {
        matches!(self, BotState::Running)
    }
}

/// Operator command, polled from the control store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Pause,
    Resume,
    Flatten,
    SetMode(TradingMode),
}

impl Command {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Some(Command::Pause),
            "resume" => Some(Command::Resume),
            "flatten" => Some(Command::Flatten),
            "set_mode paper" | "set_mode=paper" => Some(Command::SetMode(TradingMode::Paper)),
            "set_mode live" | "set_mode=live" => Some(Command::SetMode(TradingMode::Live)),
            _ => None,
        }
    }
}

/// Everything the strategy engine consumes, in mailbox arrival order.
/// A single receiver serializes all mutation of the position slot.
#[derive(Debug, Clone)]
pub enum Event {
    Liquidation(LiquidationEvent),
    MonitorTick,
    HeartbeatTick,
    Command(Command),
    FeedUnavailable,
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("pause"), Some(Command::Pause));
        assert_eq!(Command::parse(" FLATTEN "), Some(Command::Flatten));
        assert_eq!(
            Command::parse("set_mode live"),
            Some(Command::SetMode(TradingMode::Live))
        );
        assert_eq!(Command::parse("nonsense"), None);
    }

    #[test]
    fn test_entry_states() {
        assert!(BotState::Running.accepts_entries());
        assert!(!BotState::PausedManual.accepts_entries());
        assert!(!BotState::PausedRiskLimit.accepts_entries());
        assert!(!BotState::Error.accepts_entries());
    }
}
