//! Stable C ABI.
//!
//! Opaque handles wrap the Rust types; every function is null-tolerant and
//! reports failures through the stable status codes (see
//! [`crate::error::Status`]). Entry data values of string and bytes type
//! point directly into the memory-mapped database and carry an explicit
//! size; they are valid until the database is closed and are never
//! null-terminated. Owned outputs (`matchy_result_to_json`,
//! `matchy_get_pattern_string`, entry data lists) have named `free`
//! partners.

// C-style type names are part of the ABI surface.
#![allow(non_camel_case_types)]

use crate::builder::DatabaseBuilder;
use crate::database::{Database, OpenOptions};
use crate::error::Status;
use crate::value::RawValue;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;

/// Success status code.
pub const MATCHY_SUCCESS: i32 = Status::Success as i32;
/// File-open failure status code.
pub const MATCHY_FILE_OPEN_ERROR: i32 = Status::FileOpenError as i32;
/// Corrupt search trie status code.
pub const MATCHY_CORRUPT_SEARCH_TREE: i32 = Status::CorruptSearchTree as i32;
/// Invalid metadata status code.
pub const MATCHY_INVALID_METADATA: i32 = Status::InvalidMetadata as i32;
/// I/O failure status code.
pub const MATCHY_IO_ERROR: i32 = Status::IoError as i32;
/// Out-of-memory status code.
pub const MATCHY_OUT_OF_MEMORY: i32 = Status::OutOfMemory as i32;
/// Unknown database format status code.
pub const MATCHY_UNKNOWN_DB_FORMAT: i32 = Status::UnknownDbFormat as i32;
/// Invalid data status code.
pub const MATCHY_INVALID_DATA: i32 = Status::InvalidData as i32;
/// Invalid lookup path status code.
pub const MATCHY_LOOKUP_PATH_INVALID: i32 = Status::LookupPathInvalid as i32;
/// Lookup path type mismatch status code.
pub const MATCHY_LOOKUP_PATH_DOES_NOT_MATCH_DATA: i32 =
    Status::LookupPathDoesNotMatchData as i32;
/// Invalid node number status code.
pub const MATCHY_INVALID_NODE_NUMBER: i32 = Status::InvalidNodeNumber as i32;
/// IPv6-in-IPv4-database status code.
pub const MATCHY_IPV6_IN_IPV4_DB: i32 = Status::Ipv6InIpv4Db as i32;
/// Invalid parameter status code.
pub const MATCHY_INVALID_PARAM: i32 = Status::InvalidParam as i32;
/// No-data status code.
pub const MATCHY_NO_DATA: i32 = Status::NoData as i32;

/// Entry data type tag: UTF-8 string.
pub const MATCHY_DATA_TYPE_UTF8_STRING: u32 = 2;
/// Entry data type tag: double.
pub const MATCHY_DATA_TYPE_DOUBLE: u32 = 3;
/// Entry data type tag: bytes.
pub const MATCHY_DATA_TYPE_BYTES: u32 = 4;
/// Entry data type tag: uint16.
pub const MATCHY_DATA_TYPE_UINT16: u32 = 5;
/// Entry data type tag: uint32.
pub const MATCHY_DATA_TYPE_UINT32: u32 = 6;
/// Entry data type tag: map.
pub const MATCHY_DATA_TYPE_MAP: u32 = 7;
/// Entry data type tag: int32.
pub const MATCHY_DATA_TYPE_INT32: u32 = 8;
/// Entry data type tag: uint64.
pub const MATCHY_DATA_TYPE_UINT64: u32 = 9;
/// Entry data type tag: uint128.
pub const MATCHY_DATA_TYPE_UINT128: u32 = 10;
/// Entry data type tag: array.
pub const MATCHY_DATA_TYPE_ARRAY: u32 = 11;
/// Entry data type tag: boolean.
pub const MATCHY_DATA_TYPE_BOOLEAN: u32 = 14;
/// Entry data type tag: float.
pub const MATCHY_DATA_TYPE_FLOAT: u32 = 15;

// ============================================================================
// OPAQUE HANDLES AND PLAIN STRUCTS
// ============================================================================

/// Opaque builder handle.
#[repr(C)]
pub struct matchy_builder_t {
    _private: [u8; 0],
}

/// Opaque database handle.
#[repr(C)]
pub struct matchy_t {
    _private: [u8; 0],
}

/// Options for `matchy_open_with_options`.
///
/// Always initialize with `matchy_init_open_options` so new fields keep
/// their defaults in old callers.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct matchy_open_options_t {
    /// Query cache capacity; 0 disables the cache.
    pub cache_capacity: u32,
    /// Non-zero skips checksum and structural validation on open.
    pub trusted: u8,
}

/// Query result.
#[repr(C)]
pub struct matchy_result_t {
    /// Whether a record matched.
    pub found: bool,
    /// Matched prefix length in bits (0 for pattern matches).
    pub prefix_len: u16,
    /// Internal record reference; release with `matchy_free_result`.
    pub _internal: *mut c_void,
}

/// Entry handle extracted from a result.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct matchy_entry_s {
    /// Owning database.
    pub db: *const matchy_t,
    /// Payload offset in the data section.
    pub data_offset: u32,
}

/// Value union inside `matchy_entry_data_t`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union matchy_entry_data_value_u {
    /// String pointer (NOT null-terminated; length in `data_size`).
    pub utf8_string: *const c_char,
    /// Bytes pointer (length in `data_size`).
    pub bytes: *const u8,
    /// Double value.
    pub double_value: f64,
    /// Float value.
    pub float_value: f32,
    /// uint16 value.
    pub uint16: u16,
    /// uint32 value.
    pub uint32: u32,
    /// int32 value.
    pub int32: i32,
    /// uint64 value.
    pub uint64: u64,
    /// uint128 value, big-endian bytes.
    pub uint128: [u8; 16],
    /// Boolean value.
    pub boolean: bool,
}

/// One decoded value head.
#[repr(C)]
pub struct matchy_entry_data_t {
    /// Whether this slot holds a value.
    pub has_data: bool,
    /// One of the `MATCHY_DATA_TYPE_*` tags.
    pub type_: u32,
    /// The value.
    pub value: matchy_entry_data_value_u,
    /// Byte length for strings/bytes; pair or element count for maps and
    /// arrays; otherwise the scalar width.
    pub data_size: u32,
}

/// Node of a flattened entry data list.
#[repr(C)]
pub struct matchy_entry_data_list_t {
    /// This node's value.
    pub entry_data: matchy_entry_data_t,
    /// Next node or NULL.
    pub next: *mut matchy_entry_data_list_t,
}

struct ResultInternal {
    db: *const matchy_t,
    data_offset: u32,
}

impl matchy_builder_t {
    fn wrap(builder: Box<DatabaseBuilder>) -> *mut Self {
        Box::into_raw(builder) as *mut Self
    }

    unsafe fn unwrap(ptr: *mut Self) -> Box<DatabaseBuilder> {
        Box::from_raw(ptr as *mut DatabaseBuilder)
    }

    unsafe fn as_mut<'a>(ptr: *mut Self) -> &'a mut DatabaseBuilder {
        &mut *(ptr as *mut DatabaseBuilder)
    }
}

impl matchy_t {
    fn wrap(db: Box<Database>) -> *mut Self {
        Box::into_raw(db) as *mut Self
    }

    unsafe fn unwrap(ptr: *mut Self) -> Box<Database> {
        Box::from_raw(ptr as *mut Database)
    }

    unsafe fn as_ref<'a>(ptr: *const Self) -> &'a Database {
        &*(ptr as *const Database)
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Create a new database builder. Free with `matchy_builder_free`.
#[no_mangle]
pub extern "C" fn matchy_builder_new() -> *mut matchy_builder_t {
    matchy_builder_t::wrap(Box::new(DatabaseBuilder::new()))
}

/// Add an entry with a JSON payload.
///
/// The key is classified automatically: addresses and CIDR networks become
/// prefix entries, everything else becomes a pattern entry.
///
/// # Safety
/// `builder` must come from `matchy_builder_new`; `key` and `json_data`
/// must be valid null-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn matchy_builder_add(
    builder: *mut matchy_builder_t,
    key: *const c_char,
    json_data: *const c_char,
) -> i32 {
    if builder.is_null() || key.is_null() || json_data.is_null() {
        return MATCHY_INVALID_PARAM;
    }
    let key = match CStr::from_ptr(key).to_str() {
        Ok(s) => s,
        Err(_) => return MATCHY_INVALID_PARAM,
    };
    let json = match CStr::from_ptr(json_data).to_str() {
        Ok(s) => s,
        Err(_) => return MATCHY_INVALID_PARAM,
    };
    match matchy_builder_t::as_mut(builder).add_entry_json(key, json) {
        Ok(()) => MATCHY_SUCCESS,
        Err(e) => e.status() as i32,
    }
}

/// Build and write the database to `path`.
///
/// On failure nothing is left at `path`.
///
/// # Safety
/// `builder` must come from `matchy_builder_new`; `path` must be a valid
/// null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn matchy_builder_save(
    builder: *mut matchy_builder_t,
    path: *const c_char,
) -> i32 {
    if builder.is_null() || path.is_null() {
        return MATCHY_INVALID_PARAM;
    }
    let path = match CStr::from_ptr(path).to_str() {
        Ok(s) => s,
        Err(_) => return MATCHY_INVALID_PARAM,
    };
    match matchy_builder_t::as_mut(builder).save(path) {
        Ok(()) => MATCHY_SUCCESS,
        Err(e) => e.status() as i32,
    }
}

/// Free a builder. NULL is a no-op.
///
/// # Safety
/// `builder` must be NULL or a pointer from `matchy_builder_new`, and must
/// not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn matchy_builder_free(builder: *mut matchy_builder_t) {
    if !builder.is_null() {
        drop(matchy_builder_t::unwrap(builder));
    }
}

// ============================================================================
// OPEN / CLOSE
// ============================================================================

/// Fill an options struct with the defaults (cache capacity 1000, not
/// trusted).
///
/// # Safety
/// `options` must be NULL (no-op) or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn matchy_init_open_options(options: *mut matchy_open_options_t) {
    if options.is_null() {
        return;
    }
    *options = matchy_open_options_t {
        cache_capacity: 1000,
        trusted: 0,
    };
}

/// Open a database file with default options.
///
/// # Safety
/// `path` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn matchy_open(path: *const c_char) -> *mut matchy_t {
    let mut options = matchy_open_options_t {
        cache_capacity: 0,
        trusted: 0,
    };
    matchy_init_open_options(&mut options);
    matchy_open_with_options(path, &options)
}

/// Open a database file. Returns NULL on any failure, including NULL
/// arguments.
///
/// # Safety
/// `path` must be a valid null-terminated C string; `options` must be NULL
/// or a struct initialized via `matchy_init_open_options`.
#[no_mangle]
pub unsafe extern "C" fn matchy_open_with_options(
    path: *const c_char,
    options: *const matchy_open_options_t,
) -> *mut matchy_t {
    if path.is_null() || options.is_null() {
        return ptr::null_mut();
    }
    let path = match CStr::from_ptr(path).to_str() {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };
    let opts = OpenOptions {
        cache_capacity: (*options).cache_capacity,
        trusted: (*options).trusted != 0,
    };
    match Database::open_with_options(path, opts) {
        Ok(db) => matchy_t::wrap(Box::new(db)),
        Err(_) => ptr::null_mut(),
    }
}

/// Open a database over a caller-provided buffer. No bytes are copied; the
/// buffer must stay valid and unmodified until `matchy_close`.
///
/// # Safety
/// `buffer` must point to `size` readable bytes that outlive the handle.
#[no_mangle]
pub unsafe extern "C" fn matchy_open_buffer(buffer: *const u8, size: usize) -> *mut matchy_t {
    if buffer.is_null() || size == 0 {
        return ptr::null_mut();
    }
    let slice = std::slice::from_raw_parts(buffer, size);
    // The C contract promises the buffer outlives the handle.
    let slice: &'static [u8] = std::mem::transmute::<&[u8], &'static [u8]>(slice);
    match Database::from_static_buffer(slice, OpenOptions::default()) {
        Ok(db) => matchy_t::wrap(Box::new(db)),
        Err(_) => ptr::null_mut(),
    }
}

/// Close a database, releasing the mapping and the cache. NULL is a no-op.
///
/// # Safety
/// `db` must be NULL or a pointer from an open call, and must not be used
/// afterwards; all entries and results derived from it become invalid.
#[no_mangle]
pub unsafe extern "C" fn matchy_close(db: *mut matchy_t) {
    if !db.is_null() {
        drop(matchy_t::unwrap(db));
    }
}

// ============================================================================
// QUERY
// ============================================================================

fn empty_result() -> matchy_result_t {
    matchy_result_t {
        found: false,
        prefix_len: 0,
        _internal: ptr::null_mut(),
    }
}

/// Query a key (IP address text or pattern-query text).
///
/// Free the result with `matchy_free_result`.
///
/// # Safety
/// `db` must be a valid open handle; `key` must be a valid null-terminated
/// C string.
#[no_mangle]
pub unsafe extern "C" fn matchy_query(
    db: *const matchy_t,
    key: *const c_char,
) -> matchy_result_t {
    if db.is_null() || key.is_null() {
        return empty_result();
    }
    let key = match CStr::from_ptr(key).to_str() {
        Ok(s) => s,
        Err(_) => return empty_result(),
    };
    match matchy_t::as_ref(db).query(key) {
        Ok(answer) => {
            let entry = match answer.entry() {
                Ok(e) => e,
                Err(_) => return empty_result(),
            };
            let internal = Box::new(ResultInternal {
                db,
                data_offset: entry.data_offset(),
            });
            matchy_result_t {
                found: true,
                prefix_len: answer.prefix_len,
                _internal: Box::into_raw(internal) as *mut c_void,
            }
        }
        Err(_) => empty_result(),
    }
}

/// Query a socket address (unix only).
///
/// # Safety
/// `db` must be a valid open handle; `sockaddr` must point to a valid
/// `sockaddr_in` or `sockaddr_in6`.
#[cfg(unix)]
#[no_mangle]
pub unsafe extern "C" fn matchy_query_sockaddr(
    db: *const matchy_t,
    sockaddr: *const libc::sockaddr,
) -> matchy_result_t {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    if db.is_null() || sockaddr.is_null() {
        return empty_result();
    }
    let addr = match (*sockaddr).sa_family as i32 {
        libc::AF_INET => {
            let sa = sockaddr as *const libc::sockaddr_in;
            IpAddr::V4(Ipv4Addr::from(u32::from_be((*sa).sin_addr.s_addr)))
        }
        libc::AF_INET6 => {
            let sa = sockaddr as *const libc::sockaddr_in6;
            IpAddr::V6(Ipv6Addr::from((*sa).sin6_addr.s6_addr))
        }
        _ => return empty_result(),
    };
    match matchy_t::as_ref(db).query_ip(addr) {
        Ok(answer) => {
            let entry = match answer.entry() {
                Ok(e) => e,
                Err(_) => return empty_result(),
            };
            let internal = Box::new(ResultInternal {
                db,
                data_offset: entry.data_offset(),
            });
            matchy_result_t {
                found: true,
                prefix_len: answer.prefix_len,
                _internal: Box::into_raw(internal) as *mut c_void,
            }
        }
        Err(_) => empty_result(),
    }
}

/// Free a query result. Safe to call on a not-found result; NULL is a
/// no-op.
///
/// # Safety
/// `result` must be NULL or a result from a query function, freed at most
/// once.
#[no_mangle]
pub unsafe extern "C" fn matchy_free_result(result: *mut matchy_result_t) {
    if result.is_null() || (*result)._internal.is_null() {
        return;
    }
    drop(Box::from_raw((*result)._internal as *mut ResultInternal));
    (*result)._internal = ptr::null_mut();
}

// ============================================================================
// ENTRY ACCESS
// ============================================================================

/// Extract the entry handle from a result.
///
/// # Safety
/// `result` must be a live result from a query; `entry` must be a valid
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn matchy_result_get_entry(
    result: *const matchy_result_t,
    entry: *mut matchy_entry_s,
) -> i32 {
    if result.is_null() || entry.is_null() {
        return MATCHY_INVALID_PARAM;
    }
    let res = &*result;
    if !res.found || res._internal.is_null() {
        return MATCHY_NO_DATA;
    }
    let internal = &*(res._internal as *const ResultInternal);
    *entry = matchy_entry_s {
        db: internal.db,
        data_offset: internal.data_offset,
    };
    MATCHY_SUCCESS
}

fn fill_entry_data(raw: RawValue<'_>) -> matchy_entry_data_t {
    let (type_, value, data_size) = match raw {
        RawValue::MapHeader(n) => (
            MATCHY_DATA_TYPE_MAP,
            matchy_entry_data_value_u { uint32: 0 },
            n as u32,
        ),
        RawValue::ArrayHeader(n) => (
            MATCHY_DATA_TYPE_ARRAY,
            matchy_entry_data_value_u { uint32: 0 },
            n as u32,
        ),
        RawValue::String(s) => (
            MATCHY_DATA_TYPE_UTF8_STRING,
            matchy_entry_data_value_u {
                utf8_string: s.as_ptr() as *const c_char,
            },
            s.len() as u32,
        ),
        RawValue::Bytes(b) => (
            MATCHY_DATA_TYPE_BYTES,
            matchy_entry_data_value_u { bytes: b.as_ptr() },
            b.len() as u32,
        ),
        RawValue::Double(d) => (
            MATCHY_DATA_TYPE_DOUBLE,
            matchy_entry_data_value_u { double_value: d },
            8,
        ),
        RawValue::Float(f) => (
            MATCHY_DATA_TYPE_FLOAT,
            matchy_entry_data_value_u { float_value: f },
            4,
        ),
        RawValue::Uint16(n) => (
            MATCHY_DATA_TYPE_UINT16,
            matchy_entry_data_value_u { uint16: n },
            2,
        ),
        RawValue::Uint32(n) => (
            MATCHY_DATA_TYPE_UINT32,
            matchy_entry_data_value_u { uint32: n },
            4,
        ),
        RawValue::Int32(n) => (
            MATCHY_DATA_TYPE_INT32,
            matchy_entry_data_value_u { int32: n },
            4,
        ),
        RawValue::Uint64(n) => (
            MATCHY_DATA_TYPE_UINT64,
            matchy_entry_data_value_u { uint64: n },
            8,
        ),
        RawValue::Uint128(n) => (
            MATCHY_DATA_TYPE_UINT128,
            matchy_entry_data_value_u {
                uint128: n.to_be_bytes(),
            },
            16,
        ),
        RawValue::Bool(b) => (
            MATCHY_DATA_TYPE_BOOLEAN,
            matchy_entry_data_value_u { boolean: b },
            1,
        ),
    };
    matchy_entry_data_t {
        has_data: true,
        type_,
        value,
        data_size,
    }
}

fn no_entry_data() -> matchy_entry_data_t {
    matchy_entry_data_t {
        has_data: false,
        type_: 0,
        value: matchy_entry_data_value_u { uint32: 0 },
        data_size: 0,
    }
}

/// Navigate a NULL-terminated array of path components and read the value
/// there. String values point into the mapping and are not
/// null-terminated.
///
/// # Safety
/// `entry` must come from `matchy_result_get_entry` with its database
/// still open; `entry_data` must be valid; `path` must be a
/// NULL-terminated array of valid C strings.
#[no_mangle]
pub unsafe extern "C" fn matchy_aget_value(
    entry: *const matchy_entry_s,
    entry_data: *mut matchy_entry_data_t,
    path: *const *const c_char,
) -> i32 {
    if entry.is_null() || entry_data.is_null() || path.is_null() {
        return MATCHY_INVALID_PARAM;
    }
    let e = &*entry;
    if e.db.is_null() {
        *entry_data = no_entry_data();
        return MATCHY_INVALID_PARAM;
    }

    let mut components: Vec<&str> = Vec::new();
    let mut i = 0isize;
    loop {
        let part = *path.offset(i);
        if part.is_null() {
            break;
        }
        match CStr::from_ptr(part).to_str() {
            Ok(s) => components.push(s),
            Err(_) => {
                *entry_data = no_entry_data();
                return MATCHY_INVALID_PARAM;
            }
        }
        i += 1;
    }

    let db = matchy_t::as_ref(e.db);
    let handle = db.entry_at(e.data_offset);
    match handle.peek_at(&components) {
        Ok(raw) => {
            *entry_data = fill_entry_data(raw);
            MATCHY_SUCCESS
        }
        Err(err) => {
            *entry_data = no_entry_data();
            err.status() as i32
        }
    }
}

/// Flatten the whole payload into a linked list in prefix order. Free with
/// `matchy_free_entry_data_list`.
///
/// # Safety
/// `entry` must come from `matchy_result_get_entry` with its database
/// still open; `entry_data_list` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn matchy_get_entry_data_list(
    entry: *const matchy_entry_s,
    entry_data_list: *mut *mut matchy_entry_data_list_t,
) -> i32 {
    if entry.is_null() || entry_data_list.is_null() {
        return MATCHY_INVALID_PARAM;
    }
    let e = &*entry;
    if e.db.is_null() {
        return MATCHY_INVALID_PARAM;
    }

    let db = matchy_t::as_ref(e.db);
    let flat = match db.entry_at(e.data_offset).flatten_raw() {
        Ok(flat) => flat,
        Err(err) => return err.status() as i32,
    };

    let mut head: *mut matchy_entry_data_list_t = ptr::null_mut();
    let mut tail: *mut matchy_entry_data_list_t = ptr::null_mut();
    for raw in flat {
        let node = Box::into_raw(Box::new(matchy_entry_data_list_t {
            entry_data: fill_entry_data(raw),
            next: ptr::null_mut(),
        }));
        if head.is_null() {
            head = node;
        } else {
            (*tail).next = node;
        }
        tail = node;
    }
    *entry_data_list = head;
    MATCHY_SUCCESS
}

/// Free a list from `matchy_get_entry_data_list`. NULL is a no-op.
///
/// # Safety
/// `list` must be NULL or a list head from `matchy_get_entry_data_list`,
/// freed at most once.
#[no_mangle]
pub unsafe extern "C" fn matchy_free_entry_data_list(list: *mut matchy_entry_data_list_t) {
    let mut current = list;
    while !current.is_null() {
        let next = (*current).next;
        drop(Box::from_raw(current));
        current = next;
    }
}

/// Serialize a result's payload to a JSON string. Free with
/// `matchy_free_string`. Returns NULL for not-found results.
///
/// # Safety
/// `result` must be a live result from a query whose database is still
/// open.
#[no_mangle]
pub unsafe extern "C" fn matchy_result_to_json(result: *const matchy_result_t) -> *mut c_char {
    if result.is_null() || !(*result).found || (*result)._internal.is_null() {
        return ptr::null_mut();
    }
    let internal = &*((*result)._internal as *const ResultInternal);
    if internal.db.is_null() {
        return ptr::null_mut();
    }
    let db = matchy_t::as_ref(internal.db);
    let json = match db.entry_at(internal.data_offset).to_json() {
        Ok(json) => json,
        Err(_) => return ptr::null_mut(),
    };
    match CString::new(json) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Free a string returned by this library. NULL is a no-op.
///
/// # Safety
/// `string` must be NULL or an owned string from this library, freed at
/// most once.
#[no_mangle]
pub unsafe extern "C" fn matchy_free_string(string: *mut c_char) {
    if !string.is_null() {
        drop(CString::from_raw(string));
    }
}

// ============================================================================
// INTROSPECTION
// ============================================================================

/// Number of stored patterns; 0 for NULL or pattern-less databases.
///
/// # Safety
/// `db` must be NULL or a valid open handle.
#[no_mangle]
pub unsafe extern "C" fn matchy_pattern_count(db: *const matchy_t) -> usize {
    if db.is_null() {
        return 0;
    }
    matchy_t::as_ref(db).pattern_count()
}

/// The pattern string for a dense pattern ID, as an owned C string. Free
/// with `matchy_free_string`; NULL on bad arguments.
///
/// # Safety
/// `db` must be NULL or a valid open handle.
#[no_mangle]
pub unsafe extern "C" fn matchy_get_pattern_string(
    db: *const matchy_t,
    pattern_id: u32,
) -> *mut c_char {
    if db.is_null() {
        return ptr::null_mut();
    }
    match matchy_t::as_ref(db).pattern_string(pattern_id) {
        Ok(pattern) => match CString::new(pattern) {
            Ok(s) => s.into_raw(),
            Err(_) => ptr::null_mut(),
        },
        Err(_) => ptr::null_mut(),
    }
}

/// Whether the database carries a pattern index.
///
/// # Safety
/// `db` must be NULL or a valid open handle.
#[no_mangle]
pub unsafe extern "C" fn matchy_has_pattern_data(db: *const matchy_t) -> bool {
    !db.is_null() && matchy_t::as_ref(db).has_pattern_data()
}

/// Container format version; 0 for NULL.
///
/// # Safety
/// `db` must be NULL or a valid open handle.
#[no_mangle]
pub unsafe extern "C" fn matchy_format(db: *const matchy_t) -> u32 {
    if db.is_null() {
        return 0;
    }
    matchy_t::as_ref(db).format_version()
}

/// Static human-readable description for a status code.
#[no_mangle]
pub extern "C" fn matchy_strerror(status: i32) -> *const c_char {
    // Status descriptions are static ASCII with no interior NULs; the table
    // below mirrors Status::describe with C lifetimes.
    let msg: &'static str = match status {
        0 => "Success\0",
        1 => "Error opening database file\0",
        2 => "Corrupt search tree\0",
        3 => "Invalid metadata\0",
        4 => "I/O error\0",
        5 => "Out of memory\0",
        6 => "Unknown database format\0",
        7 => "Invalid or corrupt data\0",
        8 => "Invalid lookup path\0",
        9 => "Lookup path does not match data\0",
        10 => "Invalid node number\0",
        11 => "IPv6 lookup in IPv4-only database\0",
        12 => "Invalid parameter\0",
        13 => "No data for this entry\0",
        _ => "Unknown error code\0",
    };
    msg.as_ptr() as *const c_char
}
