//! Signal-domain watermarking.
//!
//! The payload matrix is added to the approximation (LL) sub-band of a
//! single-level Haar decomposition of the blue channel, and read back blindly
//! from the same window when no metadata survives.
//!
//! # Components
//!
//! - **wavelet**: forward/inverse 2-D Haar transform
//! - **carrier**: decode/encode and channel plane access
//! - **embed**: additive coefficient embedding
//! - **extract**: blind extraction and the viewable rendering of its result

pub mod carrier;
pub mod embed;
pub mod extract;
pub mod wavelet;

pub use carrier::{Carrier, Channel, OutputFormat, EMBED_CHANNEL};
pub use embed::{CoefficientEmbedder, EmbedPlacement};
pub use extract::{render_viewable, ExtractedSignal, SignalExtractor, MAX_BLIND_CONFIDENCE};
