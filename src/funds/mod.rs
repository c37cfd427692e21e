//! Funds in and out: deposit crediting (memo and per-user address
//! flows), deposit address allocation, and the withdrawal manager.

pub mod address;
pub mod allocator;
pub mod deposits;
pub mod derive;
pub mod observer;
pub mod withdrawals;

pub use allocator::AddressAllocator;
pub use deposits::DepositManager;
pub use observer::DepositObserver;
pub use withdrawals::WithdrawalManager;
