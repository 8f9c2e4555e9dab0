pub mod admin;
pub mod bonus;
pub mod events;
pub mod otp;
pub mod schema;
pub mod twofactor;
pub mod users;
pub mod wallets;
pub mod ws;
