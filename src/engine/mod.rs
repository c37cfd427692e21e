//! Market engine — round lifecycle, bet placement, pari-mutuel settlement
//! and the periodic driver that moves rounds through their states.

pub mod rounds;
pub mod betting;
pub mod settlement;
pub mod runner;
