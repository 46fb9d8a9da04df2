//! Pairwise interaction terms of the effective Hamiltonian.

pub mod flory;

pub use self::flory::FloryInteraction;
