//! NetCDF reader for climate grid datasets.
//!
//! Opens a NetCDF-4 file and returns a [`climate_common::GridSource`]: the
//! dimension lattice, the requested variables flattened in row-major order
//! (first dimension slowest) and the descriptive global attributes.
//!
//! Files are read with the native `netcdf` library; system requirements are
//! `libhdf5-dev` and `libnetcdf-dev`.

pub mod error;
pub mod native;

pub use error::{NetCdfError, NetCdfResult};
pub use native::{duration_unit_seconds, open_grid_source, read_axes, silence_hdf5_errors};
