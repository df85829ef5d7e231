#![no_std]

// Shared logic for the toy detonator.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and heap allocation. Hardware is reached only through
// the collaborator traits exposed by `detonation` and `fifo`.

pub mod config;
pub mod context;
pub mod debounce;
pub mod detonation;
pub mod fifo;
pub mod input;
pub mod orientation;
pub mod telemetry;
