pub mod gsv_collect;

pub use gsv_collect::{GsvCollect, PanoLookup, PanoMetadata, PanoramaService};
