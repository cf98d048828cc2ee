//! Shared, version-pinned identifiers.
//!
//! Schema strings for machine-readable reports and the fixed symbol names of the
//! emitted C routines. Downstream harnesses link against these names, so renaming
//! any of them is a breaking change.

pub const FIELDGEN_DIAG_SCHEMA_VERSION: &str = "fieldgen.diag@0.1.0";
pub const FIELDGEN_REPORT_SCHEMA_VERSION: &str = "fieldgen.report@0.1.0";
pub const FIELDGEN_BOUNDS_SCHEMA_VERSION: &str = "fieldgen.bounds@0.1.0";

/// Symbol names of the emitted routines and types.
pub mod abi {
    pub const FIELD_ELEM_T: &str = "field_elem_t";
    pub const DFIELD_ELEM_T: &str = "dfield_elem_t";
    pub const FIELD_ELEM_PRECOMPUTED_T: &str = "field_elem_precomputed_t";

    pub const CARRY_ROUND: &str = "carry_round";
    pub const CARRY_ROUND_SINGLE: &str = "carry_round_single";
    pub const REDUCE: &str = "reduce";

    pub const FIELD_MUL: &str = "field_mul";
    pub const FIELD_MUL_NO_CARRY: &str = "field_mul_no_carry";
    pub const FIELD_MUL_REDUCE: &str = "field_mul_reduce";
    pub const FIELD_SQR: &str = "field_sqr";
    pub const FIELD_SQR_NO_CARRY: &str = "field_sqr_no_carry";
    pub const FIELD_SQR_REDUCE: &str = "field_sqr_reduce";

    pub const FIELD_ADD: &str = "field_add";
    pub const FIELD_ADD_REDUCE: &str = "field_add_reduce";
    pub const FIELD_ADD_MIX: &str = "field_add_mix";
    pub const FIELD_ADD_DBL: &str = "field_add_dbl";

    pub const PACK_FIELD_ELEM: &str = "pack_field_elem";
    pub const UNPACK_FIELD_ELEM: &str = "unpack_field_elem";
    pub const UNPACK_KEY: &str = "unpack_key";
    pub const UNPACK_AND_ENCODE_FIELD_ELEM: &str = "unpack_and_encode_field_elem";
    pub const UNPACK_AND_ENCODE_LAST_FIELD_ELEM: &str = "unpack_and_encode_last_field_elem";

    pub const PRECOMPUTE_FACTOR: &str = "precompute_factor";
    pub const FIELD_MUL_PRECOMPUTED: &str = "field_mul_precomputed";
    pub const FIELD_MUL_PRECOMPUTED_NO_CARRY: &str = "field_mul_precomputed_no_carry";
    pub const FIELD_MUL_PRECOMPUTED_REDUCE: &str = "field_mul_precomputed_reduce";
    pub const FIELD_SQR_PRECOMPUTED: &str = "field_sqr_precomputed";
    pub const FIELD_SQR_PRECOMPUTED_NO_CARRY: &str = "field_sqr_precomputed_no_carry";
    pub const FIELD_SQR_PRECOMPUTED_REDUCE: &str = "field_sqr_precomputed_reduce";

    /// Provided by the message transform library the emitted header includes.
    pub const TRANSFORM_MSG: &str = "transform_msg";

    /// Name of the sticky overflow status local in checked routines.
    pub const STATUS_FLAG: &str = "OFLAG";
}
