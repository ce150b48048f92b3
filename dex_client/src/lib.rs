// Token metadata discovery: Jupiter token catalog plus the generic
// bulk-then-per-item lookup strategy

pub mod resolution;
pub mod token_metadata_service;

pub use resolution::{resolve_two_tier, ChunkPolicy, Resolution, TwoTierSource};
pub use token_metadata_service::{
    JupiterTokenCatalog, JupiterTokenConfig, TokenCatalog, TokenMetadata, TokenMetadataError,
    TokenMetadataService, TokenMetadataSettings, UNKNOWN_NAME, UNKNOWN_SYMBOL,
};
