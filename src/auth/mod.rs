mod clock;
mod storage;
mod token;
mod token_manager;

pub use clock::{Clock, FixedClock, SystemClock};
pub use storage::TokenStorage;
pub use token::{ExpiryParseError, TokenHandle, TokenInfo, TokenState, EXPIRY_FORMAT};
pub use token_manager::{
    TokenManager, GRANT_TYPE, ISSUE_API_ID, ISSUE_PATH, REVOKE_API_ID, REVOKE_PATH,
};
