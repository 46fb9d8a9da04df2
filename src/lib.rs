//! Core engine of a self-consistent field theory (SCFT) simulator for
//! inhomogeneous polymer melts, block copolymers, solvents and embedded
//! nanoparticles.
//!
//! The engine computes equilibrium monomer density profiles by solving
//! modified-diffusion propagator equations pseudo-spectrally on a periodic
//! grid, coupled to conjugate chemical-potential fields through a
//! steepest-descent relaxation of an effective Hamiltonian under an
//! incompressibility constraint.

#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod errors {
    // Create the Error, ErrorKind, ResultExt, and Result types
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
        }
    }
}

pub mod boundary;
pub mod comm;
pub mod config;
pub mod constraint;
pub mod decomp;
pub mod domain;
pub mod field;
pub mod fft;
pub mod grid;
pub mod hamil;
pub mod interaction;
pub mod output;
pub mod physfield;
pub mod polymer;
pub mod random;
pub mod solvent;
pub mod stfunc;
pub mod updater;

/// 2 pi
pub const TWOPI: f64 = 2.0 * std::f64::consts::PI;

#[cfg(test)]
pub(crate) mod test_helper {
    /// Compares two floats with a fixed tolerance.
    pub fn equal_floats(a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        (a - b).abs() < 1e-11
    }

    pub fn equal_floats_tol(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }
}
