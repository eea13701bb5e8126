/// Path and string helpers shared by the handlers / 路径与字符串工具函数

/// Clean and normalize a provider path / 清理和规范化路径
/// 1. Replace backslashes with forward slashes / 将反斜杠替换为正斜杠
/// 2. Ensure path starts with / / 确保路径以 / 开头
/// 3. Clean . and .. in path / 清理路径中的 . 和 ..
pub fn fix_and_clean_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Join a parent path and a child name / 拼接路径
pub fn join_path(parent: &str, name: &str) -> String {
    fix_and_clean_path(&format!("{}/{}", parent, name))
}

/// Last component of a key, id or path / 取最后一段
pub fn basename(id: &str) -> &str {
    let trimmed = id.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}

/// Split a `;`-separated list. Empty entries are dropped, `/` becomes the root (empty string).
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| if s == "/" { String::new() } else { s.to_string() })
        .collect()
}

/// Providers render digests differently (case, quotes) / 哈希统一小写
pub fn normalize_digest(digest: &str) -> String {
    digest.trim().trim_matches('"').to_ascii_lowercase()
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
