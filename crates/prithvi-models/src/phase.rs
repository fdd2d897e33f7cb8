//! Seismic phase classification helpers.

/// First-arriving P family, including the regional branches.
pub fn is_p_phase(phase: &str) -> bool {
    matches!(phase, "P" | "Pn" | "Pg" | "Pb")
}

/// Core phases that arrive as "P-like" onsets at large distances.
pub fn is_pkp_phase(phase: &str) -> bool {
    matches!(phase, "PKP" | "PKPab" | "PKPdf" | "PKiKP")
}

/// Depth phases, whose presence pins the focal depth.
pub fn is_depth_phase(phase: &str) -> bool {
    matches!(phase, "pP" | "sP")
}
