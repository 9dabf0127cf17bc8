// Telegram 的实体偏移与长度均以 UTF-16 码元计

pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// 将 UTF-8 字节偏移换算为 UTF-16 偏移，越界时按全文长度计
pub fn byte_to_utf16(text: &str, byte_offset: usize) -> usize {
    let end = byte_offset.min(text.len());
    text.char_indices()
        .take_while(|(i, _)| *i < end)
        .map(|(_, c)| c.len_utf16())
        .sum()
}
