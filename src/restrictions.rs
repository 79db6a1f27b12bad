//! Account Restrictions Module
//!
//! Capability flags a super admin can place on an account. Stored as a
//! Postgres `TEXT[]` on the user row and checked by the trading and
//! transaction paths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RestrictionsError {
    #[error("Unknown restriction: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    NoTrading,
    NoDeposit,
    NoWithdrawal,
}

impl Restriction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Restriction::NoTrading => "no_trading",
            Restriction::NoDeposit => "no_deposit",
            Restriction::NoWithdrawal => "no_withdrawal",
        }
    }
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Restriction {
    type Err = RestrictionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no_trading" => Ok(Restriction::NoTrading),
            "no_deposit" => Ok(Restriction::NoDeposit),
            "no_withdrawal" => Ok(Restriction::NoWithdrawal),
            _ => Err(RestrictionsError::Unknown(s.to_string())),
        }
    }
}

/// Set of restrictions applied to one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Restrictions(BTreeSet<Restriction>);

impl Restrictions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the raw column value. Unknown flags are an error rather than
    /// being dropped, so a typo in the database never lifts a restriction.
    pub fn from_db(raw: &[String]) -> Result<Self, RestrictionsError> {
        raw.iter()
            .map(|s| s.parse::<Restriction>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn to_db(&self) -> Vec<String> {
        self.0.iter().map(|r| r.as_str().to_string()).collect()
    }

    pub fn contains(&self, restriction: Restriction) -> bool {
        self.0.contains(&restriction)
    }

    pub fn insert(&mut self, restriction: Restriction) -> bool {
        self.0.insert(restriction)
    }

    pub fn remove(&mut self, restriction: Restriction) -> bool {
        self.0.remove(&restriction)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Restriction> for Restrictions {
    fn from_iter<I: IntoIterator<Item = Restriction>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        let restrictions = Restrictions::default();
        assert!(restrictions.is_empty());
        assert!(!restrictions.contains(Restriction::NoTrading));
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("NO_TRADING".parse::<Restriction>(), Ok(Restriction::NoTrading));
        assert_eq!("No_Deposit".parse::<Restriction>(), Ok(Restriction::NoDeposit));
    }

    #[test]
    fn test_from_db_rejects_unknown() {
        let raw = vec!["no_trading".to_string(), "no_fun".to_string()];
        assert_eq!(
            Restrictions::from_db(&raw),
            Err(RestrictionsError::Unknown("no_fun".to_string()))
        );
    }

    #[test]
    fn test_add_remove() {
        let mut restrictions = Restrictions::new();
        assert!(restrictions.insert(Restriction::NoWithdrawal));
        assert!(!restrictions.insert(Restriction::NoWithdrawal));
        assert_eq!(restrictions.to_db(), vec!["no_withdrawal".to_string()]);
        assert!(restrictions.remove(Restriction::NoWithdrawal));
        assert!(restrictions.is_empty());
    }
}
