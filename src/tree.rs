//! Object tree (spec §4.K): the in-memory mirror of the on-disk
//! hierarchy — groups, variables, dimensions, attributes — indexed by
//! both ordinal id and simple name within their namespace, linked by
//! FQN for persistence.
//!
//! Grounded on the teacher's `node/group.rs` container tree
//! (`clbarnes-zarr3-rs/src/node/group.rs`), generalized from "pure
//! container of groups/arrays" to the full ownership model of spec §3:
//! a `Dataset` owns everything transitively; dimensions are referenced
//! from variables by numeric id, resolved through the owning group,
//! with FQN strings used only for persistence (spec §9's
//! cyclic-reference rearchitecture note).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::ChunkCache;
use crate::chunkkey::{ChunkKeyScheme, Separator};
use crate::codec::FilterChain;
use crate::dtype::{Endian, NcType};
use crate::error::{NczError, NczResult};
use crate::map::Map;
use crate::url::DatasetFlags;

/// Reserved attribute names with special handling (spec §3).
pub const ATTR_FILL_VALUE: &str = "_FillValue";
pub const ATTR_ARRAY_DIMENSIONS: &str = "_ARRAY_DIMENSIONS";
pub const ATTR_NC_PROPERTIES: &str = "_NCProperties";
pub const ATTR_MAXSTRLEN: &str = "_nczarr_maxstrlen";
pub const ATTR_DEFAULT_MAXSTRLEN: &str = "_nczarr_default_maxstrlen";
pub const ATTR_CODECS: &str = "_Codecs";
pub const ATTR_FILTERS: &str = "_Filters";
pub const ATTR_QUANTIZE_BITGROOM: &str = "_QuantizeBitGroom";
pub const ATTR_QUANTIZE_GRANULAR_BR: &str = "_QuantizeGranularBR";
pub const ATTR_QUANTIZE_BITROUND: &str = "_QuantizeBitRound";

/// True for attributes that are never persisted as ordinary attribute
/// entries because their content lives elsewhere in the metadata
/// document (spec §3 "hidden").
pub fn is_hidden_attribute(name: &str) -> bool {
    matches!(
        name,
        ATTR_MAXSTRLEN | ATTR_DEFAULT_MAXSTRLEN | ATTR_CODECS | ATTR_FILTERS
    )
}

/// True for attributes that are read-only reflections of variable
/// state rather than independently settable.
pub fn is_readonly_attribute(name: &str) -> bool {
    matches!(
        name,
        ATTR_CODECS | ATTR_FILTERS | ATTR_MAXSTRLEN | ATTR_DEFAULT_MAXSTRLEN
    )
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub nctype: NcType,
    pub length: usize,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct Dimension {
    pub id: usize,
    pub name: String,
    pub length: u64,
    pub unlimited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Chunked,
}

#[derive(Debug, Clone)]
pub enum FillPolicy {
    NoFill,
    Value(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeMode {
    None,
    BitGroom,
    GranularBr,
    BitRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarState {
    Defined,
    Created,
    Dirty,
    Suppressed,
}

pub struct Variable {
    pub id: usize,
    pub name: String,
    pub nctype: NcType,
    /// Empty for a scalar variable (rank 0); persisted form uses `[1]`.
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    /// Numeric dimension ids, resolved through the owning group.
    pub dim_ids: Vec<usize>,
    /// FQNs as last persisted/read; authoritative for writing
    /// `_nczarr_array.dimrefs` / `dimensions`.
    pub dim_fqns: Vec<String>,
    pub sep: Separator,
    /// Physical chunk-key addressing scheme (spec §4.H); independent of
    /// `sep` — a V3 array's `chunk_key_encoding.name` picks this, while
    /// V2 is always [`ChunkKeyScheme::V2`].
    pub chunk_key_scheme: ChunkKeyScheme,
    pub storage: StorageKind,
    pub fill_policy: FillPolicy,
    pub endian: Endian,
    pub filters: FilterChain,
    pub max_strlen: usize,
    pub quantize: QuantizeMode,
    pub nsd: u32,
    pub attributes: Vec<Attribute>,
    pub state: VarState,
    pub cache: Arc<ChunkCache>,
}

impl Variable {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn element_count_per_chunk(&self) -> u64 {
        if self.chunk_shape.is_empty() {
            1
        } else {
            self.chunk_shape.iter().product()
        }
    }

    pub fn chunk_count_along(&self, dim: usize) -> u64 {
        if self.shape.is_empty() {
            return 1;
        }
        let s = self.shape[dim];
        let c = self.chunk_shape[dim];
        (s + c - 1) / c
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.name == name)
    }

    pub fn set_attribute(&mut self, attr: Attribute) {
        if let Some(existing) = self.get_attribute_mut(&attr.name) {
            *existing = attr;
        } else {
            self.attributes.push(attr);
        }
    }

    /// Spec §3 invariant check: chunk rank matches shape rank, and each
    /// chunk dimension is >= 1.
    pub fn validate_shape(&self) -> NczResult<()> {
        if self.chunk_shape.len() != self.shape.len() {
            return Err(NczError::BadDim(format!(
                "chunk rank {} != shape rank {}",
                self.chunk_shape.len(),
                self.shape.len()
            )));
        }
        if self.chunk_shape.iter().any(|&c| c < 1) {
            return Err(NczError::BadDim("chunk shape elements must be >= 1".into()));
        }
        Ok(())
    }

    /// Spec §3/§8: each `dim_fqns[i]` must resolve, from `root`, to an
    /// existing `Dimension` whose length equals `shape[i]`. `root` is
    /// the dataset's root group, since a dim reference may cross group
    /// boundaries (spec §4.K FQN resolution).
    pub fn validate_dim_lengths(&self, root: &Group) -> NczResult<()> {
        for (fqn, &len) in self.dim_fqns.iter().zip(self.shape.iter()) {
            let segments = split_fqn(fqn);
            let dim = match root.locate(&segments, FqnKind::Dim) {
                Some(FqnTarget::Dim(d)) => d,
                _ => {
                    return Err(NczError::BadDim(format!(
                        "variable {}: dimension {fqn} does not exist",
                        self.name
                    )))
                }
            };
            if dim.length != len {
                return Err(NczError::BadDim(format!(
                    "variable {}: shape element {len} does not match dimension {fqn} length {}",
                    self.name, dim.length
                )));
            }
        }
        Ok(())
    }

    /// Spec §8: empty `shape` array suppresses the variable — but note
    /// this only applies to a *persisted empty array*, not the internal
    /// scalar representation (rank 0 is modeled as `shape = []` here and
    /// is a perfectly valid scalar variable). Callers that parsed an
    /// on-disk `"shape": []` for what should be a non-scalar array are
    /// the ones expected to call this.
    pub fn suppress(&mut self) {
        self.state = VarState::Suppressed;
    }

    pub fn is_suppressed(&self) -> bool {
        self.state == VarState::Suppressed
    }
}

pub struct Group {
    pub id: usize,
    pub name: String,
    pub path: String,
    pub groups: Vec<Group>,
    pub dims: Vec<Dimension>,
    pub vars: Vec<Variable>,
    pub attributes: Vec<Attribute>,
    next_dim_id: usize,
    next_var_id: usize,
    next_group_id: usize,
}

impl Group {
    pub fn new_root(id: usize) -> Self {
        Self {
            id,
            name: "/".to_string(),
            path: "/".to_string(),
            groups: Vec::new(),
            dims: Vec::new(),
            vars: Vec::new(),
            attributes: Vec::new(),
            next_dim_id: 0,
            next_var_id: 0,
            next_group_id: 0,
        }
    }

    fn child_path(&self, name: &str) -> String {
        if self.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path)
        }
    }

    pub fn add_group(&mut self, name: &str) -> NczResult<&mut Group> {
        validate_name(name)?;
        if self.groups.iter().any(|g| g.name == name) {
            return Err(NczError::NameInUse(format!("group {name} already exists")));
        }
        let id = self.next_group_id;
        self.next_group_id += 1;
        let path = self.child_path(name);
        let mut g = Group::new_root(id);
        g.name = name.to_string();
        g.path = path;
        self.groups.push(g);
        Ok(self.groups.last_mut().unwrap())
    }

    pub fn add_dimension(&mut self, name: &str, length: u64, unlimited: bool) -> NczResult<usize> {
        validate_name(name)?;
        if self.dims.iter().any(|d| d.name == name) {
            return Err(NczError::NameInUse(format!("dimension {name} already exists")));
        }
        let id = self.next_dim_id;
        self.next_dim_id += 1;
        self.dims.push(Dimension {
            id,
            name: name.to_string(),
            length,
            unlimited,
        });
        Ok(id)
    }

    pub fn find_dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    pub fn fqn_of_dim(&self, dim_name: &str) -> String {
        if self.path == "/" {
            format!("/{dim_name}")
        } else {
            format!("{}/{dim_name}", self.path)
        }
    }

    fn alloc_var_id(&mut self) -> usize {
        let id = self.next_var_id;
        self.next_var_id += 1;
        id
    }

    pub fn add_variable(&mut self, var: Variable) -> NczResult<&mut Variable> {
        if self.vars.iter().any(|v| v.name == var.name) {
            return Err(NczError::NameInUse(format!("variable {} already exists", var.name)));
        }
        // Validate dim_fqns owned by this group (spec §3/§8). A dim_fqn
        // owned by an ancestor group isn't resolvable from here; those
        // are validated fully, against the dataset root, by
        // `chunkio::define_variable` at creation time.
        for (fqn, &len) in var.dim_fqns.iter().zip(var.shape.iter()) {
            let segments = split_fqn(fqn);
            if let Some(last) = segments.last() {
                if self.fqn_of_dim(last) != *fqn {
                    continue;
                }
                let dim = self.find_dimension(last).ok_or_else(|| {
                    NczError::BadDim(format!("variable {}: dimension {fqn} does not exist", var.name))
                })?;
                if dim.length != len {
                    return Err(NczError::BadDim(format!(
                        "variable {}: shape element {len} does not match dimension {fqn} length {}",
                        var.name, dim.length
                    )));
                }
            }
        }
        let id = self.alloc_var_id();
        self.vars.push(var);
        let added = self.vars.last_mut().unwrap();
        added.id = id;
        Ok(added)
    }

    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn find_variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.vars.iter_mut().find(|v| v.name == name)
    }

    pub fn find_group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn find_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn set_attribute(&mut self, attr: Attribute) {
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == attr.name) {
            *existing = attr;
        } else {
            self.attributes.push(attr);
        }
    }

    /// Resolve a `/`-separated path relative to this group, walking
    /// groups (spec §4.K). The final segment may name a dimension or a
    /// variable, selected by `kind`.
    pub fn locate(&self, segments: &[String], kind: FqnKind) -> Option<FqnTarget<'_>> {
        if segments.is_empty() {
            return None;
        }
        if segments.len() == 1 {
            return match kind {
                FqnKind::Dim => self.find_dimension(&segments[0]).map(FqnTarget::Dim),
                FqnKind::Var => self.find_variable(&segments[0]).map(FqnTarget::Var),
                FqnKind::Group => self.find_group(&segments[0]).map(FqnTarget::Group),
            };
        }
        let child = self.find_group(&segments[0])?;
        child.locate(&segments[1..], kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FqnKind {
    Dim,
    Var,
    Group,
}

pub enum FqnTarget<'a> {
    Dim(&'a Dimension),
    Var(&'a Variable),
    Group(&'a Group),
}

/// Split an FQN into unescaped path segments (spec §4.K: `\`, `/`,
/// `.`, `@` may be backslash-escaped; resolution splits on *unescaped*
/// `/`).
pub fn split_fqn(fqn: &str) -> Vec<String> {
    let trimmed = fqn.trim_start_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '\\' | '/' | '.' | '@') {
                    current.push(next);
                    chars.next();
                    continue;
                }
            }
            current.push(c);
        } else if c == '/' {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    segments.push(current);
    segments
}

/// Escape a single path segment for inclusion in an FQN.
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::new();
    for c in segment.chars() {
        if matches!(c, '\\' | '/' | '.' | '@') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build an FQN for `name` within `group`.
pub fn make_fqn(group: &Group, name: &str) -> String {
    if group.path == "/" {
        format!("/{}", escape_segment(name))
    } else {
        format!("{}/{}", group.path, escape_segment(name))
    }
}

const NC_MAX_NAME: usize = 256;

/// netCDF object naming rules (spec §4.K): length bound, no leading
/// digit, and rejection of reserved prefixes is left to the attribute
/// layer (reserved *attribute* names are intercepted there; ordinary
/// object names only need the generic well-formedness check here).
pub fn validate_name(name: &str) -> NczResult<()> {
    if name.is_empty() {
        return Err(NczError::BadName("name must not be empty".into()));
    }
    if name.chars().count() > NC_MAX_NAME {
        return Err(NczError::BadName(format!("name exceeds NC_MAX_NAME ({NC_MAX_NAME})")));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(NczError::BadName(format!("name {name} must not start with a digit")));
    }
    if name.contains('/') {
        return Err(NczError::BadName(format!("name {name} must not contain '/'")));
    }
    Ok(())
}

/// The top-level dataset (spec §3): a single logical Zarr hierarchy
/// rooted at a map key, owning every group/var/dim/attribute
/// transitively.
pub struct Dataset {
    pub root: Group,
    pub format: crate::dispatch::FormatVersion,
    pub nczarr_format: u32,
    pub native_endian: Endian,
    pub default_max_strlen: usize,
    pub flags: DatasetFlags,
    pub map: Arc<dyn Map>,
    pub read_only: bool,
    next_group_id: usize,
}

impl Dataset {
    pub fn new(map: Arc<dyn Map>, format: crate::dispatch::FormatVersion, flags: DatasetFlags, read_only: bool) -> Self {
        Self {
            root: Group::new_root(0),
            format,
            nczarr_format: 3,
            native_endian: Endian::Native,
            default_max_strlen: 0,
            flags,
            map,
            read_only,
            next_group_id: 1,
        }
    }

    pub fn alloc_group_id(&mut self) -> usize {
        let id = self.next_group_id;
        self.next_group_id += 1;
        id
    }

    /// Used by metadata codecs after reconstructing a tree from disk,
    /// where group ids were assigned during the recursive read rather
    /// than through [`Self::alloc_group_id`].
    pub fn set_next_group_id(&mut self, id: usize) {
        self.next_group_id = id;
    }

    /// Resolve an FQN from the root, per spec §8's
    /// `NCZ_locateFQN(makeFQN(g, o)) = o` round-trip law.
    pub fn locate_fqn(&self, fqn: &str, kind: FqnKind) -> Option<FqnTarget<'_>> {
        let segments = split_fqn(fqn);
        if segments.is_empty() {
            return None;
        }
        self.root.locate(&segments, kind)
    }

    pub fn require_writable(&self) -> NczResult<()> {
        if self.read_only {
            return Err(NczError::Permission("dataset was opened read-only".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqn_roundtrip_for_nested_dimension() {
        let mut root = Group::new_root(0);
        root.add_dimension("x", 10, false).unwrap();
        let child = root.add_group("sub").unwrap();
        child.add_dimension("y", 20, false).unwrap();

        let fqn_x = root.fqn_of_dim("x");
        assert_eq!(fqn_x, "/x");
        let segs = split_fqn(&fqn_x);
        match root.locate(&segs, FqnKind::Dim) {
            Some(FqnTarget::Dim(d)) => assert_eq!(d.name, "x"),
            _ => panic!("expected to resolve /x"),
        }

        let fqn_y = "/sub/y";
        let segs = split_fqn(fqn_y);
        match root.locate(&segs, FqnKind::Dim) {
            Some(FqnTarget::Dim(d)) => assert_eq!(d.name, "y"),
            _ => panic!("expected to resolve /sub/y"),
        }
    }

    #[test]
    fn escaped_characters_round_trip_through_split() {
        let escaped = escape_segment("a/b.c@d\\e");
        let fqn = format!("/{escaped}");
        let segs = split_fqn(&fqn);
        assert_eq!(segs, vec!["a/b.c@d\\e".to_string()]);
    }

    #[test]
    fn duplicate_names_rejected_within_namespace() {
        let mut root = Group::new_root(0);
        root.add_dimension("x", 10, false).unwrap();
        let err = root.add_dimension("x", 5, false).unwrap_err();
        assert!(matches!(err, NczError::NameInUse(_)));
    }

    #[test]
    fn name_starting_with_digit_is_rejected() {
        assert!(validate_name("1bad").is_err());
        assert!(validate_name("good_1").is_ok());
    }

    fn test_var(name: &str, shape: Vec<u64>, dim_fqns: Vec<String>) -> Variable {
        let cache = Arc::new(ChunkCache::new(1024, Box::new(|_, _| Ok(()))));
        let chunk_shape = shape.iter().map(|_| 1).collect();
        Variable {
            id: 0,
            name: name.to_string(),
            nctype: NcType::Int,
            shape,
            chunk_shape,
            dim_ids: Vec::new(),
            dim_fqns,
            sep: Separator::Dot,
            chunk_key_scheme: ChunkKeyScheme::V2,
            storage: StorageKind::Chunked,
            fill_policy: FillPolicy::NoFill,
            endian: Endian::Little,
            filters: FilterChain::default(),
            max_strlen: 0,
            quantize: QuantizeMode::None,
            nsd: 0,
            attributes: Vec::new(),
            state: VarState::Created,
            cache,
        }
    }

    #[test]
    fn add_variable_assigns_ordinal_id() {
        let mut root = Group::new_root(0);
        root.add_dimension("x", 4, false).unwrap();
        root.add_variable(test_var("a", vec![4], vec!["/x".to_string()])).unwrap();
        root.add_variable(test_var("b", vec![4], vec!["/x".to_string()])).unwrap();
        assert_eq!(root.find_variable("a").unwrap().id, 0);
        assert_eq!(root.find_variable("b").unwrap().id, 1);
    }

    #[test]
    fn add_variable_rejects_shape_dimension_length_mismatch() {
        let mut root = Group::new_root(0);
        root.add_dimension("x", 4, false).unwrap();
        let err = root
            .add_variable(test_var("a", vec![5], vec!["/x".to_string()]))
            .unwrap_err();
        assert!(matches!(err, NczError::BadDim(_)));
    }

    #[test]
    fn add_variable_rejects_missing_dimension() {
        let mut root = Group::new_root(0);
        let err = root
            .add_variable(test_var("a", vec![4], vec!["/missing".to_string()]))
            .unwrap_err();
        assert!(matches!(err, NczError::BadDim(_)));
    }

    #[test]
    fn validate_dim_lengths_resolves_across_group_boundary() {
        let mut root = Group::new_root(0);
        root.add_dimension("x", 4, false).unwrap();
        let var = test_var("a", vec![4], vec!["/x".to_string()]);
        assert!(var.validate_dim_lengths(&root).is_ok());

        let mismatched = test_var("b", vec![9], vec!["/x".to_string()]);
        assert!(mismatched.validate_dim_lengths(&root).is_err());
    }
}
