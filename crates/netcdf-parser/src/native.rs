//! Grid source reading through the native netcdf library.

use std::path::Path;
use std::sync::Once;

use climate_common::{
    Dimension, GlobalAttributes, GridSource, GridSpec, SampleKind, VariableBuffer,
};
use tracing::{debug, instrument};

use crate::error::{NetCdfError, NetCdfResult};

/// Silence HDF5's automatic error printing to stderr.
///
/// The HDF5 C library prints verbose error messages to stderr even when errors
/// are handled gracefully by the Rust code (e.g., when checking for optional
/// attributes that don't exist). This disables that output by calling
/// H5Eset_auto2 with null handlers. Safe to call multiple times.
///
/// **Important**: call this early in `main()` before any HDF5/NetCDF
/// operations occur, otherwise silencing may not cover every operation.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 is thread-safe and we're passing null pointers
        // to disable error output, which is a documented valid use.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Open a grid file and read the named variables.
///
/// `dimensions` fixes the expected layout of every variable; when empty the
/// layout of the first variable is used. Coordinate values come from the
/// coordinate variable of each dimension, or `0..len` when there is none.
/// Fill values become `NaN`, `scale_factor`/`add_offset` are applied, and
/// variables whose `units` is a bare CF time unit are read as durations.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn open_grid_source(
    path: &Path,
    dimensions: &[String],
    variables: &[&str],
) -> NetCdfResult<GridSource> {
    silence_hdf5_errors();
    let file = open(path)?;

    let mut order: Vec<String> = dimensions.to_vec();
    let mut buffers = Vec::with_capacity(variables.len());
    for &name in variables {
        let var = file
            .variable(name)
            .ok_or_else(|| NetCdfError::MissingData(format!("variable '{}'", name)))?;
        let actual: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        if order.is_empty() {
            order = actual.clone();
        }
        if actual != order {
            return Err(NetCdfError::DimensionOrder {
                variable: name.to_string(),
                expected: order,
                actual,
            });
        }
        buffers.push(read_variable(&var)?);
    }

    let spec = GridSpec::new(
        order
            .iter()
            .map(|name| read_dimension(&file, name))
            .collect::<NetCdfResult<Vec<_>>>()?,
    );
    debug!(
        dimensions = ?order,
        variables = buffers.len(),
        cells = spec.cell_count().unwrap_or(0),
        "Read grid source"
    );

    Ok(GridSource {
        spec,
        variables: buffers,
        attributes: read_global_attributes(&file),
    })
}

/// Read one-dimensional coordinate axes by name, e.g. `["lon", "lat"]`.
pub fn read_axes(path: &Path, names: &[&str]) -> NetCdfResult<Vec<Vec<f64>>> {
    silence_hdf5_errors();
    let file = open(path)?;
    names
        .iter()
        .map(|name| {
            let var = file
                .variable(name)
                .ok_or_else(|| NetCdfError::MissingData(format!("coordinate '{}'", name)))?;
            var.get_values::<f64, _>(..)
                .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to read {}: {}", name, e)))
        })
        .collect()
}

fn open(path: &Path) -> NetCdfResult<netcdf::File> {
    if !path.exists() {
        return Err(NetCdfError::OpenFailed {
            path: path.display().to_string(),
            message: "file not found".to_string(),
        });
    }
    netcdf::open(path).map_err(|e| NetCdfError::OpenFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn read_dimension(file: &netcdf::File, name: &str) -> NetCdfResult<Dimension> {
    let len = file
        .dimension(name)
        .ok_or_else(|| NetCdfError::MissingData(format!("dimension '{}'", name)))?
        .len();

    let values = match file.variable(name) {
        Some(var) => var
            .get_values::<f64, _>(..)
            .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to read {}: {}", name, e)))?,
        None => (0..len).map(|i| i as f64).collect(),
    };
    if values.len() != len {
        return Err(NetCdfError::InvalidFormat(format!(
            "coordinate '{}' has {} values for a dimension of {}",
            name,
            values.len(),
            len
        )));
    }
    Ok(Dimension::new(name, values))
}

fn read_variable(var: &netcdf::Variable) -> NetCdfResult<VariableBuffer> {
    let name = var.name();
    let raw: Vec<f64> = var
        .get_values::<f64, _>(..)
        .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to read {}: {}", name, e)))?;

    let scale_factor = get_f64_attr(var, "scale_factor").unwrap_or(1.0);
    let add_offset = get_f64_attr(var, "add_offset").unwrap_or(0.0);
    let fill_value = get_f64_attr(var, "_FillValue").or_else(|| get_f64_attr(var, "missing_value"));

    let samples = raw
        .into_iter()
        .map(|val| match fill_value {
            Some(fill) if val == fill => f64::NAN,
            _ => val * scale_factor + add_offset,
        })
        .collect();

    let kind = get_string_attr(var, "units")
        .and_then(|units| duration_unit_seconds(&units))
        .map(|seconds_per_unit| SampleKind::Duration { seconds_per_unit })
        .unwrap_or_default();

    Ok(VariableBuffer::new(name, samples).with_kind(kind))
}

fn read_global_attributes(file: &netcdf::File) -> GlobalAttributes {
    let text = |name: &str| match file.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    };
    let id = file.attribute("id").and_then(|a| a.value().ok()).and_then(|v| match v {
        netcdf::AttributeValue::Int(i) => Some(i64::from(i)),
        netcdf::AttributeValue::Longlong(i) => Some(i),
        netcdf::AttributeValue::Short(i) => Some(i64::from(i)),
        netcdf::AttributeValue::Str(s) => s.trim().parse().ok(),
        _ => None,
    });

    GlobalAttributes {
        id,
        title: text("title"),
        description: text("description"),
        category: text("category"),
        model: text("model"),
        unit: text("units").or_else(|| text("unit")),
    }
}

/// Seconds per unit for a bare CF time unit, or `None` for anything else
/// (including reference-time units such as `days since 1970-01-01`).
pub fn duration_unit_seconds(units: &str) -> Option<f64> {
    match units.trim() {
        "days" | "day" | "d" => Some(86_400.0),
        "hours" | "hour" | "h" => Some(3_600.0),
        "minutes" | "minute" | "min" => Some(60.0),
        "seconds" | "second" | "s" | "sec" => Some(1.0),
        _ => None,
    }
}

/// Check if a variable has an attribute with the given name.
/// This avoids HDF5 error spam when checking for optional attributes.
fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}

fn get_string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}
