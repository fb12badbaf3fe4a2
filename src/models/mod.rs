pub mod assessment;
pub mod attempt;
pub mod identity;
pub mod question;
