use serde::Deserialize;

/// 字符串或数字统一反序列化为字符串（支持 null 值）
///
/// 用户服务中的 `contact` 字段有时是数字，有时是字符串
pub fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Deserialize::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(String::new()),
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(serde::de::Error::custom(format!(
            "期望字符串或数字，实际为: {}",
            other
        ))),
    }
}

const AVATAR_PALETTE: [&str; 8] = [
    "#4B7BE5", "#E5734B", "#4BE59A", "#B84BE5", "#E5C44B", "#4BC9E5", "#E54B7B", "#7BE54B",
];

/// 根据会话 ID 生成稳定的头像颜色（服务器不返回颜色）
pub fn avatar_color_for(id: &str) -> String {
    let hash = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    AVATAR_PALETTE[(hash as usize) % AVATAR_PALETTE.len()].to_string()
}

const PROVISIONAL_PREFIX: &str = "pending-";

/// 生成乐观发送时使用的临时消息 ID
pub fn provisional_msg_id(seq: u64) -> String {
    format!("{}{}", PROVISIONAL_PREFIX, seq)
}

/// 从临时消息 ID 中解析序号，服务器 ID 返回 None
pub fn parse_provisional_seq(id: &str) -> Option<u64> {
    id.strip_prefix(PROVISIONAL_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_color_is_stable() {
        assert_eq!(avatar_color_for("690245f2"), avatar_color_for("690245f2"));
        assert!(avatar_color_for("").starts_with('#'));
    }

    #[test]
    fn provisional_ids_are_numbered() {
        assert_eq!(provisional_msg_id(1), "pending-1");
        assert_eq!(parse_provisional_seq(&provisional_msg_id(42)), Some(42));
        assert_eq!(parse_provisional_seq("m999"), None);
        assert_eq!(parse_provisional_seq("pending-x"), None);
    }
}
