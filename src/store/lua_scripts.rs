/// Lua script incrementing a counter only if it already exists
///
/// A plain `INCRBY` would create a missing key without an expiration, which
/// would leave a counter that never resets.
///
/// KEYS[1] = the counter key
/// ARGV[1] = increment
///
/// Returns: the new value, or nil if the key does not exist
pub const INCR_IF_EXISTS_SCRIPT: &str = r#"
local key = KEYS[1]
local delta = tonumber(ARGV[1])

if redis.call('EXISTS', key) == 0 then
    return false
end

return redis.call('INCRBY', key, delta)
"#;
