// Repositories Module
// Re-exports all repository implementations

pub mod chain_repository;

pub use chain_repository::ChainRepositoryImpl;
