use core::ffi::c_void;
use std::ffi::CString;
use std::path::Path;
use std::slice;

use aishiz_abi::batch::Batch;
use aishiz_abi::engine::{ContextParams, InferenceEngine, ModelParams};
use aishiz_abi::error::EngineError;
use aishiz_abi::ffi::{AishizString, EngineApi, FreeStringFn, ERR_OK};
use aishiz_abi::sampling::SamplingParams;
use aishiz_abi::token::Token;
use tracing::warn;

use crate::loader::LoadedPlugin;

/// [`InferenceEngine`] backed by a loaded plugin's vtable.
#[derive(Clone, Copy)]
pub struct PluginEngine {
    plugin: &'static LoadedPlugin,
}

impl PluginEngine {
    pub fn new(plugin: &'static LoadedPlugin) -> Self {
        Self { plugin }
    }

    fn api(&self) -> &'static EngineApi {
        &self.plugin.api.engine
    }

    /// Plugin's last error, or `fallback` if it has none.
    fn last_error(&self, fallback: &str) -> String {
        let api = self.api();
        let msg = unsafe { take_plugin_bytes(api.free_string, (api.last_error)()) };
        if msg.is_empty() {
            fallback.to_string()
        } else {
            String::from_utf8_lossy(&msg).into_owned()
        }
    }
}

macro_rules! plugin_handle {
    ($name:ident, $free:ident) => {
        pub struct $name {
            ptr: *mut c_void,
            api: &'static EngineApi,
        }

        impl Drop for $name {
            fn drop(&mut self) {
                if !self.ptr.is_null() {
                    unsafe { (self.api.$free)(self.ptr) };
                    self.ptr = std::ptr::null_mut();
                }
            }
        }

        // SAFETY: each handle is owned by one session worker at a time.
        unsafe impl Send for $name {}
    };
}

plugin_handle!(PluginModel, free_model);
plugin_handle!(PluginContext, free_context);
plugin_handle!(PluginSampler, free_sampler);

fn make_cstring(s: &str) -> Result<CString, String> {
    CString::new(s).map_err(|_| "string contains interior NUL".to_string())
}

fn to_json_cstring<T: serde::Serialize>(value: &T) -> Result<CString, String> {
    let js = serde_json::to_string(value).map_err(|e| e.to_string())?;
    make_cstring(&js)
}

unsafe fn take_plugin_bytes(api_free: FreeStringFn, s: AishizString) -> Vec<u8> {
    if s.ptr.is_null() {
        return Vec::new();
    }
    let out = if s.len == 0 {
        Vec::new()
    } else {
        unsafe { slice::from_raw_parts(s.ptr as *const u8, s.len) }.to_vec()
    };
    unsafe { api_free(s) };
    out
}

impl InferenceEngine for PluginEngine {
    type Model = PluginModel;
    type Context = PluginContext;
    type Sampler = PluginSampler;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<PluginModel, EngineError> {
        let path = path
            .to_str()
            .ok_or_else(|| EngineError::Load("model path not valid UTF-8".into()))?;
        let cpath = make_cstring(path).map_err(EngineError::Load)?;
        let cparams = to_json_cstring(params).map_err(EngineError::Load)?;

        let ptr = unsafe { (self.api().load_model)(cpath.as_ptr(), cparams.as_ptr()) };
        if ptr.is_null() {
            return Err(EngineError::Load(self.last_error("load_model failed")));
        }
        Ok(PluginModel {
            ptr,
            api: self.api(),
        })
    }

    fn create_context(
        &self,
        model: &PluginModel,
        params: &ContextParams,
    ) -> Result<PluginContext, EngineError> {
        let cparams = to_json_cstring(params).map_err(EngineError::Context)?;
        let ptr = unsafe { (self.api().create_context)(model.ptr, cparams.as_ptr()) };
        if ptr.is_null() {
            return Err(EngineError::Context(self.last_error("create_context failed")));
        }
        Ok(PluginContext {
            ptr,
            api: self.api(),
        })
    }

    fn create_sampler(
        &self,
        model: &PluginModel,
        params: &SamplingParams,
    ) -> Result<PluginSampler, EngineError> {
        let cparams = to_json_cstring(params).map_err(EngineError::Sampler)?;
        let ptr = unsafe { (self.api().create_sampler)(model.ptr, cparams.as_ptr()) };
        if ptr.is_null() {
            return Err(EngineError::Sampler(self.last_error("create_sampler failed")));
        }
        Ok(PluginSampler {
            ptr,
            api: self.api(),
        })
    }

    fn tokenize(&self, ctx: &mut PluginContext, text: &str) -> Result<Vec<Token>, EngineError> {
        let ctext = make_cstring(text).map_err(EngineError::Tokenize)?;
        let arr = unsafe { (self.api().tokenize_utf8)(ctx.ptr, ctext.as_ptr()) };

        if arr.ptr.is_null() || arr.len == 0 {
            if !arr.ptr.is_null() {
                unsafe { (self.api().free_ints)(arr) };
            }
            let msg = self.last_error("");
            return if msg.is_empty() {
                Ok(Vec::new())
            } else {
                Err(EngineError::Tokenize(msg))
            };
        }

        let tokens = unsafe { slice::from_raw_parts(arr.ptr, arr.len) }
            .iter()
            .map(|&t| Token(t))
            .collect();
        unsafe { (self.api().free_ints)(arr) };
        Ok(tokens)
    }

    fn decode(&self, ctx: &mut PluginContext, batch: &Batch) -> Result<(), EngineError> {
        let entries = batch.entries();
        let tokens: Vec<i32> = entries.iter().map(|e| e.token.0).collect();
        let positions: Vec<i32> = entries.iter().map(|e| e.pos).collect();
        let logits: Vec<bool> = entries.iter().map(|e| e.logits).collect();

        let rc = unsafe {
            (self.api().decode)(
                ctx.ptr,
                tokens.as_ptr(),
                positions.as_ptr(),
                logits.as_ptr(),
                entries.len(),
            )
        };
        if rc == ERR_OK {
            Ok(())
        } else {
            Err(EngineError::Decode(
                self.last_error(&format!("decode failed (code {rc})")),
            ))
        }
    }

    fn sample_next(&self, sampler: &mut PluginSampler, ctx: &mut PluginContext) -> Token {
        Token(unsafe { (self.api().sample_next)(sampler.ptr, ctx.ptr) })
    }

    fn accept(&self, sampler: &mut PluginSampler, token: Token) {
        unsafe { (self.api().accept)(sampler.ptr, token.0) };
    }

    fn is_end_of_sequence(&self, model: &PluginModel, token: Token) -> bool {
        unsafe { (self.api().is_eog)(model.ptr, token.0) }
    }

    fn token_to_piece(&self, ctx: &PluginContext, token: Token) -> Vec<u8> {
        let api = self.api();
        let raw = unsafe { (api.token_to_piece)(ctx.ptr, token.0) };
        let piece = unsafe { take_plugin_bytes(api.free_string, raw) };
        if piece.is_empty() {
            let msg = self.last_error("");
            if !msg.is_empty() {
                warn!(%token, error = %msg, "token_to_piece failed");
            }
        }
        piece
    }
}
