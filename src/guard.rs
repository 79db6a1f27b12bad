//! Admin authorization guard
//!
//! Answers "may a caller with role R perform action A (on a target with role
//! T)?" over the static order `user < admin < super_admin`. Pure functions;
//! handlers call them before touching the store.

use crate::types::Role;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("{action} requires the {required} role")]
    Forbidden { action: &'static str, required: Role },
    #[error("{action} is not allowed on a {target} account")]
    ForbiddenTarget { action: &'static str, target: Role },
}

/// Operations gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// List every user, trade or transaction.
    ListAll,
    /// Natural settlement of one trade or of all expired trades.
    Settle,
    /// One-shot forced outcome on a pending trade.
    ForceTradeOutcome,
    /// Approve a pending deposit or withdrawal.
    ApproveTransaction,
    /// Edit another account; `changes_role` if the edit touches `role`.
    EditUser { changes_role: bool },
    DeleteUser,
    SetTradingMode,
    ManageRestrictions,
    AdjustBalance,
    ViewSettings,
    ManageSettings,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::ListAll => "listing all records",
            Action::Settle => "settling trades",
            Action::ForceTradeOutcome => "forcing a trade outcome",
            Action::ApproveTransaction => "approving transactions",
            Action::EditUser { changes_role: true } => "changing a role",
            Action::EditUser { changes_role: false } => "editing users",
            Action::DeleteUser => "deleting users",
            Action::SetTradingMode => "setting trading mode",
            Action::ManageRestrictions => "managing restrictions",
            Action::AdjustBalance => "adjusting balances",
            Action::ViewSettings => "viewing trading settings",
            Action::ManageSettings => "managing trading settings",
        }
    }

    /// Minimum caller role.
    fn required_role(&self) -> Role {
        match self {
            Action::ListAll
            | Action::Settle
            | Action::ApproveTransaction
            | Action::ViewSettings
            | Action::EditUser { changes_role: false } => Role::Admin,
            Action::ForceTradeOutcome
            | Action::EditUser { changes_role: true }
            | Action::DeleteUser
            | Action::SetTradingMode
            | Action::ManageRestrictions
            | Action::AdjustBalance
            | Action::ManageSettings => Role::SuperAdmin,
        }
    }
}

/// Role-only check, for actions without a target account.
pub fn authorize(caller: Role, action: Action) -> Result<(), GuardError> {
    let required = action.required_role();
    if caller < required {
        return Err(GuardError::Forbidden {
            action: action.name(),
            required,
        });
    }
    Ok(())
}

/// Target shielding, then the role check.
///
/// - an admin may only act on `user` accounts;
/// - a super admin may act on anyone, except that no one deletes a super admin.
///
/// The shield is checked first so a protected target reports
/// `ForbiddenTarget` whatever the caller's role.
pub fn authorize_target(caller: Role, action: Action, target: Role) -> Result<(), GuardError> {
    let below_super = caller < Role::SuperAdmin && target >= Role::Admin;
    let shielded = match action {
        Action::DeleteUser => target == Role::SuperAdmin || below_super,
        _ => below_super,
    };
    if shielded {
        return Err(GuardError::ForbiddenTarget {
            action: action.name(),
            target,
        });
    }

    authorize(caller, action)
}
