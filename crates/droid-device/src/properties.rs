//! Parsing of `getprop` output.

use std::collections::HashMap;

use regex::Regex;

use crate::error::DeviceError;

/// `[key]: [value]`, one per line.
const PROPERTY_PATTERN: &str = r"^\[(?P<key>[^\]:]+)\]:\s+\[(?P<value>[^\]]+)\]";

pub const SDK_VERSION: &str = "ro.build.version.sdk";
pub const CPU_ABI_LIST: &str = "ro.product.cpu.abilist";
pub const CPU_ABI: &str = "ro.product.cpu.abi";
pub const CPU_ABI2: &str = "ro.product.cpu.abi2";

/// Parse a property listing. Lines that do not match, including those with
/// an empty value, are skipped.
pub fn parse_properties(output: &str) -> Result<HashMap<String, String>, DeviceError> {
    let pattern = Regex::new(PROPERTY_PATTERN)?;
    let mut props = HashMap::new();
    for line in output.lines() {
        let Some(caps) = pattern.captures(line.trim_end()) else {
            continue;
        };
        props.insert(caps["key"].to_string(), caps["value"].to_string());
    }
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sdk_line() {
        let props = parse_properties("[ro.build.version.sdk]: [19]\n").unwrap();
        assert_eq!(props.get(SDK_VERSION).map(String::as_str), Some("19"));
    }

    #[test]
    fn skips_malformed_and_empty_values() {
        let out = "[ro.product.model]: [Nexus 5]\r\n\
                   [ro.broken]: [no closing\n\
                   [ro.empty]: []\n\
                   garbage\n\
                   [ro.product.cpu.abilist]: [arm64-v8a,armeabi-v7a]\n";
        let props = parse_properties(out).unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props["ro.product.model"], "Nexus 5");
        assert_eq!(props[CPU_ABI_LIST], "arm64-v8a,armeabi-v7a");
    }

    #[test]
    fn later_duplicate_wins() {
        let props = parse_properties("[a]: [1]\n[a]: [2]\n").unwrap();
        assert_eq!(props["a"], "2");
    }
}
