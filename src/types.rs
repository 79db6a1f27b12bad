//! Domain enums shared by the store, the settlement engine and the API.
//!
//! Every enum is stored as lowercase text in PostgreSQL and serialized the
//! same way over JSON, so `as_str` / `FromStr` are the single source of the
//! wire spelling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ParseEnumError { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

text_enum! {
    /// Account role. Declaration order is the privilege order:
    /// `User < Admin < SuperAdmin`.
    Role, "role" {
        User => "user",
        Admin => "admin",
        SuperAdmin => "super_admin",
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Role {
    fn rank(&self) -> u8 {
        match self {
            Role::User => 0,
            Role::Admin => 1,
            Role::SuperAdmin => 2,
        }
    }

    pub fn is_admin(&self) -> bool {
        *self >= Role::Admin
    }
}

text_enum! {
    UserStatus, "user status" {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
        Banned => "banned",
    }
}

text_enum! {
    /// Sticky per-user bias applied to the natural outcome of future trades.
    TradingMode, "trading mode" {
        Normal => "normal",
        Win => "win",
        Lose => "lose",
    }
}

text_enum! {
    Direction, "direction" {
        Up => "up",
        Down => "down",
    }
}

text_enum! {
    TradeResult, "trade result" {
        Pending => "pending",
        Win => "win",
        Lose => "lose",
    }
}

text_enum! {
    /// Terminal outcome of a settlement. Also the accepted values of a
    /// forced (admin) outcome.
    TradeOutcome, "trade outcome" {
        Win => "win",
        Lose => "lose",
    }
}

impl From<TradeOutcome> for TradeResult {
    fn from(outcome: TradeOutcome) -> Self {
        match outcome {
            TradeOutcome::Win => TradeResult::Win,
            TradeOutcome::Lose => TradeResult::Lose,
        }
    }
}

text_enum! {
    TransactionType, "transaction type" {
        Deposit => "deposit",
        Withdrawal => "withdrawal",
        TradeWin => "trade_win",
        TradeLoss => "trade_loss",
        AdminCredit => "admin_credit",
        AdminDebit => "admin_debit",
        Adjustment => "adjustment",
    }
}

text_enum! {
    TransactionStatus, "transaction status" {
        Pending => "pending",
        Completed => "completed",
    }
}

text_enum! {
    /// Admin balance operation.
    BalanceAction, "balance action" {
        Add => "add",
        Subtract => "subtract",
        Set => "set",
    }
}
