pub const GENERATOR_ID: &str = "fieldgen";

pub mod limits {
    pub const MAX_LIMBS: usize = 16;
    pub const MAX_FIXPOINT_ITERATIONS: usize = 100;
    pub const MAX_C_BYTES: usize = 4 * 1024 * 1024;

    pub fn max_limbs() -> usize {
        match std::env::var("FIELDGEN_MAX_LIMBS") {
            Ok(v) => v
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(MAX_LIMBS),
            Err(_) => MAX_LIMBS,
        }
    }

    pub fn max_fixpoint_iterations() -> usize {
        match std::env::var("FIELDGEN_MAX_FIXPOINT_ITERATIONS") {
            Ok(v) => v
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(MAX_FIXPOINT_ITERATIONS),
            Err(_) => MAX_FIXPOINT_ITERATIONS,
        }
    }

    pub fn max_c_bytes() -> usize {
        match std::env::var("FIELDGEN_MAX_C_BYTES") {
            Ok(v) => v
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(MAX_C_BYTES),
            Err(_) => MAX_C_BYTES,
        }
    }
}
