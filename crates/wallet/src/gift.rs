//! Gift validation rules.

use coinledger_core::{LedgerError, LedgerResult, UserId};

pub const GIFT_MIN_COINS: u64 = 100;
pub const GIFT_MAX_COINS: u64 = 1_000_000;
pub const GIFT_MESSAGE_MAX_CHARS: usize = 500;

/// Validate a gift before it reaches the transfer engine.
///
/// Checked at the boundary so an invalid gift never produces a journal
/// entry, not even a failed one.
pub fn validate_gift(
    from: UserId,
    to: UserId,
    coins: u64,
    message: Option<&str>,
) -> LedgerResult<()> {
    if from == to {
        return Err(LedgerError::validation("cannot gift coins to yourself"));
    }
    if coins < GIFT_MIN_COINS {
        return Err(LedgerError::validation(format!(
            "gift must be at least {GIFT_MIN_COINS} coins"
        )));
    }
    if coins > GIFT_MAX_COINS {
        return Err(LedgerError::validation(format!(
            "gift cannot exceed {GIFT_MAX_COINS} coins"
        )));
    }
    if let Some(message) = message {
        if message.chars().count() > GIFT_MESSAGE_MAX_CHARS {
            return Err(LedgerError::validation(format!(
                "gift message cannot exceed {GIFT_MESSAGE_MAX_CHARS} characters"
            )));
        }
    }
    Ok(())
}
