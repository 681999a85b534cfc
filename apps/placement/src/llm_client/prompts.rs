// Shared prompt constants used by every pipeline stage that calls the model.
// Stage-specific templates live in `pipeline::prompts`.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Common instruction appended to all generation prompts.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Every claim you generate must be traceable to a specific fact ID \
    from the candidate's knowledge base provided in the context. Do NOT infer, interpolate, \
    or invent tools, employers, or responsibilities. If the knowledge base does not support a \
    claim, omit it entirely. Tag every output bullet with its `source_fact_ids`; a bullet may \
    only name a skill or tool that one of its cited facts records.";

/// Appended to a prompt when the previous answer failed validation.
pub const REPAIR_TEMPLATE: &str = "\
    Your previous answer was rejected because it did not satisfy the required schema:\n\
    {issues}\n\
    Produce a corrected answer that fixes every issue above. Return the complete JSON value, \
    not a diff.";
