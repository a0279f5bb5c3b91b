use core::ffi::{c_char, c_void};

/// Bump this when you break the ABI. Host checks it at load time.
pub const AISHIZ_ABI_VERSION: u32 = 1;

pub const PLUGIN_ENTRY_SYMBOL: &str = "aishiz_engine_entry_v1";

pub const ERR_OK: i32 = 0;
pub const ERR_FAIL: i32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct AishizString {
    pub ptr: *mut c_char,
    pub len: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Int32Array {
    pub ptr: *mut i32,
    pub len: usize,
}

#[repr(C)]
pub struct PluginInfo {
    pub abi_version: u32,
    pub id: *const c_char,     // "llama"
    pub semver: *const c_char, // "0.1.0"
}

// ---------- Function pointer types (C ABI) ----------

/// `params_json` is UTF-8 JSON of `aishiz_abi::engine::ModelParams`. Null on failure.
pub type LoadModelFn =
    unsafe extern "C" fn(model_path: *const c_char, params_json: *const c_char) -> *mut c_void;
pub type FreeModelFn = unsafe extern "C" fn(model: *mut c_void);

/// `params_json` is UTF-8 JSON of `aishiz_abi::engine::ContextParams`. Null on failure.
pub type CreateContextFn =
    unsafe extern "C" fn(model: *mut c_void, params_json: *const c_char) -> *mut c_void;
pub type FreeContextFn = unsafe extern "C" fn(ctx: *mut c_void);

/// `sampling_json` is UTF-8 JSON of `SamplingParams::normalized()` with the seed resolved.
pub type CreateSamplerFn =
    unsafe extern "C" fn(model: *mut c_void, sampling_json: *const c_char) -> *mut c_void;
pub type FreeSamplerFn = unsafe extern "C" fn(sampler: *mut c_void);

pub type TokenizeUtf8Fn =
    unsafe extern "C" fn(ctx: *mut c_void, text: *const c_char) -> Int32Array;
pub type FreeIntsFn = unsafe extern "C" fn(arr: Int32Array);

/// Parallel arrays of length `len`. Returns `ERR_OK` or a failure code.
pub type DecodeFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    tokens: *const i32,
    positions: *const i32,
    logits: *const bool,
    len: usize,
) -> i32;

pub type SampleNextFn = unsafe extern "C" fn(sampler: *mut c_void, ctx: *mut c_void) -> i32;
pub type AcceptFn = unsafe extern "C" fn(sampler: *mut c_void, token_id: i32);
pub type IsEogFn = unsafe extern "C" fn(model: *mut c_void, token_id: i32) -> bool;

/// Raw piece bytes; not necessarily valid UTF-8 on its own.
pub type TokenToPieceFn = unsafe extern "C" fn(ctx: *mut c_void, token_id: i32) -> AishizString;

pub type LastErrorFn = unsafe extern "C" fn() -> AishizString;
pub type FreeStringFn = unsafe extern "C" fn(s: AishizString);

// ---------- VTable ----------

#[repr(C)]
pub struct EngineApi {
    pub load_model: LoadModelFn,
    pub free_model: FreeModelFn,

    pub create_context: CreateContextFn,
    pub free_context: FreeContextFn,

    pub create_sampler: CreateSamplerFn,
    pub free_sampler: FreeSamplerFn,

    pub tokenize_utf8: TokenizeUtf8Fn,
    pub free_ints: FreeIntsFn,

    pub decode: DecodeFn,
    pub sample_next: SampleNextFn,
    pub accept: AcceptFn,
    pub is_eog: IsEogFn,
    pub token_to_piece: TokenToPieceFn,

    // Diagnostics & memory management
    pub last_error: LastErrorFn,
    pub free_string: FreeStringFn,
}

#[repr(C)]
pub struct PluginApi {
    pub info: PluginInfo,
    pub engine: EngineApi,
}

/// Plugin must export `aishiz_engine_entry_v1` returning a pointer to a static `PluginApi`.
pub type PluginEntryFn = unsafe extern "C" fn() -> *const PluginApi;
