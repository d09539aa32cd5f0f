mod meta;
mod store;

pub use meta::{FragmentKind, FragmentMeta};
pub use store::{
    AssetKind, NewAsset, SearchHit, SearchOptions, StoreError, TableBody, VectorStore,
};

/// Dimension of every stored embedding. The backend model decides the true
/// value; this is the service-wide default.
pub const EMBEDDING_DIM: usize = 1024;
