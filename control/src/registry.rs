//! Minimal `HKEY_CURRENT_USER` string-value helpers shared by autostart
//! registration and the wallpaper style writer.

use anyhow::{bail, Result};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegQueryValueExW,
    RegSetValueExW, HKEY, HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE,
    REG_OPTION_NON_VOLATILE, REG_SZ,
};

/// Converts a Rust `&str` to a null-terminated UTF-16 `Vec<u16>`.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Writes `HKCU\<subkey>\<name> = value` (REG_SZ), creating the key if needed.
pub fn set_string(subkey: &str, name: &str, value: &str) -> Result<()> {
    let key_w = to_wide(subkey);
    let val_w = to_wide(name);
    let data_w = to_wide(value);
    let data_bytes: &[u8] = unsafe {
        std::slice::from_raw_parts(data_w.as_ptr() as *const u8, data_w.len() * 2)
    };

    let mut hkey = HKEY::default();
    let err = unsafe {
        RegCreateKeyExW(
            HKEY_CURRENT_USER,
            PCWSTR::from_raw(key_w.as_ptr()),
            0,
            PCWSTR::null(),
            REG_OPTION_NON_VOLATILE,
            KEY_SET_VALUE,
            None,
            &mut hkey,
            None,
        )
    };
    if err != ERROR_SUCCESS {
        bail!("RegCreateKeyExW({subkey}) failed: {:?}", err);
    }

    let err = unsafe {
        RegSetValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), 0, REG_SZ, Some(data_bytes))
    };
    unsafe { let _ = RegCloseKey(hkey); };

    if err != ERROR_SUCCESS {
        bail!("RegSetValueExW({name}) failed: {:?}", err);
    }
    Ok(())
}

/// Removes `HKCU\<subkey>\<name>`. Succeeds if the key or value is absent.
pub fn delete_value(subkey: &str, name: &str) -> Result<()> {
    let key_w = to_wide(subkey);
    let val_w = to_wide(name);

    let mut hkey = HKEY::default();
    let err = unsafe {
        RegOpenKeyExW(HKEY_CURRENT_USER, PCWSTR::from_raw(key_w.as_ptr()), 0, KEY_SET_VALUE, &mut hkey)
    };
    if err != ERROR_SUCCESS {
        return Ok(());
    }

    let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(val_w.as_ptr())) };
    unsafe { let _ = RegCloseKey(hkey); };

    if err != ERROR_SUCCESS && err != ERROR_FILE_NOT_FOUND {
        bail!("RegDeleteValueW({name}) failed: {:?}", err);
    }
    Ok(())
}

/// True when `HKCU\<subkey>\<name>` exists.
pub fn has_value(subkey: &str, name: &str) -> bool {
    let key_w = to_wide(subkey);
    let val_w = to_wide(name);

    let mut hkey = HKEY::default();
    let err = unsafe {
        RegOpenKeyExW(HKEY_CURRENT_USER, PCWSTR::from_raw(key_w.as_ptr()), 0, KEY_QUERY_VALUE, &mut hkey)
    };
    if err != ERROR_SUCCESS {
        return false;
    }
    let err = unsafe {
        RegQueryValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), None, None, None, None)
    };
    unsafe { let _ = RegCloseKey(hkey); };
    err == ERROR_SUCCESS
}
