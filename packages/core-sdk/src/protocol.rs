/**
 * \brief 从分享链接的 scheme 推断协议标签。
 */
pub fn protocol_from_link(link: &str) -> String {
    let Some((scheme, _)) = link.trim().split_once("://") else {
        return "unknown".to_string();
    };
    let scheme = scheme.to_ascii_lowercase();
    let tag = match scheme.as_str() {
        "" => "unknown",
        "hy2" | "hysteria2" => "hysteria2",
        "hy" | "hysteria" => "hysteria",
        "socks" | "socks5" => "socks5",
        "wg" | "wireguard" => "wireguard",
        "http" | "https" => "http",
        other => other,
    };
    tag.to_string()
}
