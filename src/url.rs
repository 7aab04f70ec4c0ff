//! URL fragment controls (spec §6): `mode=` and `nczarr=` tokens drawn
//! from `{nczarr, zarr, xarray, noxarray, v2, v3}`, setting the initial
//! flag set and the write-time format choice.

use crate::dispatch::FormatVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetFlags {
    pub purezarr: bool,
    pub xarray_dims: bool,
    pub show_fetch: bool,
    pub logging: bool,
}

impl Default for DatasetFlags {
    fn default() -> Self {
        Self {
            purezarr: false,
            xarray_dims: false,
            show_fetch: false,
            logging: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UrlMode {
    pub flags: DatasetFlags,
    /// Write-time format forced by `v2`/`v3` token, if any.
    pub forced_format: Option<FormatVersion>,
}

/// Parse the fragment of an NCZarr URL, e.g.
/// `"mode=nczarr,xarray,v2"` or `"mode=zarr&nczarr=v3"`.
///
/// Unknown tokens are ignored rather than rejected — the fragment is a
/// control channel, not a strict grammar, per spec §6.
pub fn parse_fragment(fragment: &str) -> UrlMode {
    let mut mode = UrlMode::default();
    for clause in fragment.split(['&', ';']) {
        let clause = clause.trim();
        let tokens: &str = if let Some((key, value)) = clause.split_once('=') {
            if key.eq_ignore_ascii_case("mode") || key.eq_ignore_ascii_case("nczarr") {
                value
            } else {
                continue;
            }
        } else {
            clause
        };
        for token in tokens.split(',') {
            apply_token(&mut mode, token.trim());
        }
    }
    mode
}

fn apply_token(mode: &mut UrlMode, token: &str) {
    match token.to_ascii_lowercase().as_str() {
        "nczarr" => mode.flags.purezarr = false,
        "zarr" => mode.flags.purezarr = true,
        "xarray" => mode.flags.xarray_dims = true,
        "noxarray" => mode.flags.xarray_dims = false,
        "v2" => mode.forced_format = Some(FormatVersion::V2),
        "v3" => mode.forced_format = Some(FormatVersion::V3),
        "" => {}
        _ => {}
    }
}
