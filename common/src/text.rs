/// 日志预览用的截断，按字符计数，超出部分以 `...` 结尾
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut result: String = text.chars().take(max_len.saturating_sub(3)).collect();
    result.push_str("...");
    result
}

/// 单行预览：换行替换为空格，便于日志阅读
pub fn preview_line(text: &str, max_len: usize) -> String {
    truncate_text(&text.replace(['\n', '\r'], " "), max_len)
}
