//! Guest memory conventions shared by the host and plugins.
//!
//! Buffers cross the boundary as `(ptr, size)` pairs. Functions that return a
//! buffer pack the pair into one `i64`: pointer in the high 32 bits, size in
//! the low 32 bits. `0` means "no buffer" (success for `on_create`).
//!
//! A failed host import sets [`HOST_ERROR_FLAG`] in the size half. The next
//! seven bits carry a [`HostErrorCode`], the low 24 bits the length of a UTF-8
//! message at the pointer. The pointer is `0` when no message could be
//! written. Successful buffers are always smaller than 2 GiB, so the flag
//! never appears on them.

use wasmtime::{AsContext, AsContextMut, Caller, Extern, Instance, Memory, Store, TypedFunc};

use hubble_core::{Error, Result};

use crate::host::HostState;

/// Pack a guest pointer and size into a single return value.
pub fn pack(ptr: u32, size: u32) -> i64 {
    ((u64::from(ptr) << 32) | u64::from(size)) as i64
}

/// Split a packed return value back into `(ptr, size)`.
///
/// The value is treated as two unsigned halves whatever its sign.
pub fn unpack(packed: i64) -> (u32, u32) {
    let raw = packed as u64;
    ((raw >> 32) as u32, raw as u32)
}

/// Set in the size half of a failed host import's return value.
pub const HOST_ERROR_FLAG: u32 = 1 << 31;
const HOST_ERROR_CODE_SHIFT: u32 = 24;
const HOST_ERROR_LEN_MASK: u32 = (1 << HOST_ERROR_CODE_SHIFT) - 1;

/// Longest message written back for a failed host import.
pub const HOST_ERROR_MAX_LEN: usize = 1024;

/// Why a host import failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostErrorCode {
    /// The plugin lacks the privilege the import requires.
    PermissionDenied = 1,
    /// The input buffer could not be decoded or was rejected.
    InvalidInput = 2,
    /// The requested record does not exist.
    NotFound = 3,
    /// A transient failure; the call may succeed later.
    Unavailable = 4,
    Internal = 5,
}

impl HostErrorCode {
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::NotFound(_) | Error::EntryNotFound(_) | Error::KeyNotFound(_) => {
                HostErrorCode::NotFound
            }
            Error::InvalidInput(_) | Error::Serialization(_) => HostErrorCode::InvalidInput,
            e if e.is_retryable() => HostErrorCode::Unavailable,
            _ => HostErrorCode::Internal,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => HostErrorCode::PermissionDenied,
            2 => HostErrorCode::InvalidInput,
            3 => HostErrorCode::NotFound,
            4 => HostErrorCode::Unavailable,
            _ => HostErrorCode::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostErrorCode::PermissionDenied => "permission denied",
            HostErrorCode::InvalidInput => "invalid input",
            HostErrorCode::NotFound => "not found",
            HostErrorCode::Unavailable => "unavailable",
            HostErrorCode::Internal => "internal error",
        }
    }
}

/// Return value of a failed host import whose message sits at `ptr`.
pub fn pack_host_error(ptr: u32, code: HostErrorCode, len: u32) -> i64 {
    let bits = HOST_ERROR_FLAG
        | (u32::from(code as u8) << HOST_ERROR_CODE_SHIFT)
        | (len & HOST_ERROR_LEN_MASK);
    pack(ptr, bits)
}

/// Decode a non-zero return value into `(ptr, size)` and, for failed host
/// imports, the error code.
pub fn split_return(packed: i64) -> (u32, u32, Option<HostErrorCode>) {
    let (ptr, size) = unpack(packed);
    if size & HOST_ERROR_FLAG == 0 {
        return (ptr, size, None);
    }
    let code = HostErrorCode::from_bits((size & !HOST_ERROR_FLAG) >> HOST_ERROR_CODE_SHIFT);
    (ptr, size & HOST_ERROR_LEN_MASK, Some(code))
}

/// Cut `message` to at most [`HOST_ERROR_MAX_LEN`] bytes on a char boundary.
pub fn truncate_message(message: &str) -> &str {
    if message.len() <= HOST_ERROR_MAX_LEN {
        return message;
    }
    let mut end = HOST_ERROR_MAX_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

fn guest_error(message: impl std::fmt::Display) -> Error {
    Error::Internal(format!("guest memory: {message}"))
}

/// A guest's linear memory and allocator exports.
pub struct Guest {
    memory: Memory,
    alloc: TypedFunc<u32, u32>,
    dealloc: Option<TypedFunc<(u32, u32), ()>>,
}

impl Guest {
    /// Exports seen from inside a host import.
    pub fn from_caller(caller: &mut Caller<'_, HostState>) -> Result<Self> {
        let memory = caller.get_export("memory");
        let alloc = caller
            .get_export("alloc")
            .or_else(|| caller.get_export("allocate"));
        let dealloc = caller
            .get_export("dealloc")
            .or_else(|| caller.get_export("deallocate"));
        Self::resolve(&*caller, memory, alloc, dealloc)
    }

    /// Exports of an instantiated module.
    pub fn from_instance(instance: &Instance, store: &mut Store<HostState>) -> Result<Self> {
        let memory = instance.get_export(&mut *store, "memory");
        let alloc = instance
            .get_export(&mut *store, "alloc")
            .or_else(|| instance.get_export(&mut *store, "allocate"));
        let dealloc = instance
            .get_export(&mut *store, "dealloc")
            .or_else(|| instance.get_export(&mut *store, "deallocate"));
        Self::resolve(&*store, memory, alloc, dealloc)
    }

    fn resolve(
        ctx: impl AsContext,
        memory: Option<Extern>,
        alloc: Option<Extern>,
        dealloc: Option<Extern>,
    ) -> Result<Self> {
        let memory = memory
            .and_then(Extern::into_memory)
            .ok_or_else(|| guest_error("module does not export its memory"))?;
        let alloc = alloc
            .and_then(Extern::into_func)
            .ok_or_else(|| guest_error("module exports neither alloc nor allocate"))?
            .typed::<u32, u32>(&ctx)
            .map_err(|e| guest_error(format!("alloc has the wrong signature: {e}")))?;
        let dealloc = match dealloc.and_then(Extern::into_func) {
            Some(func) => Some(
                func.typed::<(u32, u32), ()>(&ctx)
                    .map_err(|e| guest_error(format!("dealloc has the wrong signature: {e}")))?,
            ),
            None => None,
        };
        Ok(Self {
            memory,
            alloc,
            dealloc,
        })
    }

    /// Copy `size` bytes at `ptr` out of guest memory. The range is checked
    /// against the memory before anything is allocated.
    pub fn read(&self, ctx: impl AsContext, ptr: u32, size: u32) -> Result<Vec<u8>> {
        let ctx = ctx.as_context();
        let start = ptr as usize;
        let end = start
            .checked_add(size as usize)
            .filter(|end| *end <= self.memory.data_size(&ctx))
            .ok_or_else(|| guest_error(format!("read of {size} bytes at {ptr} is out of bounds")))?;
        Ok(self.memory.data(ctx)[start..end].to_vec())
    }

    pub fn read_string(&self, ctx: impl AsContext, ptr: u32, size: u32) -> Result<String> {
        let bytes = self.read(ctx, ptr, size)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidInput("guest string is not UTF-8".into()))
    }

    /// Allocate a guest buffer, copy `bytes` into it and return the packed pair.
    pub async fn write(
        &self,
        mut ctx: impl AsContextMut<Data = HostState>,
        bytes: &[u8],
    ) -> Result<i64> {
        let size = u32::try_from(bytes.len())
            .ok()
            .filter(|size| size & HOST_ERROR_FLAG == 0)
            .ok_or_else(|| guest_error(format!("buffer of {} bytes is too large", bytes.len())))?;
        let ptr = self
            .alloc
            .call_async(&mut ctx, size)
            .await
            .map_err(|e| guest_error(format!("alloc({size}) failed: {e}")))?;
        self.memory
            .write(&mut ctx, ptr as usize, bytes)
            .map_err(|e| guest_error(format!("write of {size} bytes at {ptr}: {e}")))?;
        Ok(pack(ptr, size))
    }

    /// Hand a buffer back to the guest allocator. A guest without a
    /// deallocator keeps the memory.
    pub async fn release(
        &self,
        mut ctx: impl AsContextMut<Data = HostState>,
        ptr: u32,
        size: u32,
    ) -> Result<()> {
        let Some(dealloc) = &self.dealloc else {
            return Ok(());
        };
        dealloc
            .call_async(&mut ctx, (ptr, size))
            .await
            .map_err(|e| guest_error(format!("dealloc({ptr}, {size}) failed: {e}")))
    }
}
