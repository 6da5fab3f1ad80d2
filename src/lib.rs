// src/lib.rs

// On déclare tous nos modules principaux pour les rendre publics et
// utilisables par le binaire (sentinel.rs) et les tests d'intégration.
pub mod analysis;
pub mod communication;
pub mod config;
pub mod errors;
pub mod ingestion;
pub mod liquidity;
pub mod model;
pub mod monitoring;
pub mod pipeline;
pub mod rpc;
