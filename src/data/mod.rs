//! In-memory spectral data handed over by external loaders

mod energy_bins;
pub use energy_bins::EnergyBins;

mod grouping;
pub use grouping::ChannelGrouping;

mod response;
pub use response::InstrumentResponse;

mod spectrum;
pub use spectrum::{Background, ObservedSpectrum};
