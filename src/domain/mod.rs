//! Persistence-free core logic. Functions here take snapshots of current
//! state and return intended outcomes; the services layer owns loading,
//! transactions, and event emission.

pub mod approval;
pub mod matching;
pub mod replenishment;
