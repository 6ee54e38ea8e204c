pub mod error;
pub mod ply;
pub mod random;
pub mod schema;

pub use error::IngestError;
pub use ply::{
    parse_layout,
    parse_scene,
    ParsedScene,
    PlyLayout,
};
pub use schema::{
    OffsetTable,
    SchemaMode,
};
