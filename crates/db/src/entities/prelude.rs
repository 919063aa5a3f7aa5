//! Entity re-exports.

pub use super::licenses::Entity as Licenses;
pub use super::time_credits::Entity as TimeCredits;
pub use super::time_deductions::Entity as TimeDeductions;
pub use super::time_expenditures::Entity as TimeExpenditures;
