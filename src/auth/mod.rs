pub mod crypto;
pub mod jwt;
pub mod otp;
pub mod password;
pub mod roles;
pub mod totp;
pub mod users;

pub use jwt::{Claims, issue_token, verify_token};
pub use otp::{OtpIssued, OtpRequest, OtpService, OtpTransport};
pub use roles::{RoleStore, effective_permissions, has_permission, permission_matches};
pub use totp::{TwoFactorService, TwoFactorSetup};
