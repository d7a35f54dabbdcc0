use anyhow::{Context, Result};
use qrcode::render::unicode;
use qrcode::QrCode;

/// Render `url` as a terminal QR code using half-block characters
pub fn render_qr(url: &str) -> Result<String> {
    let code = QrCode::new(url.as_bytes()).context("Failed to generate QR code")?;

    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_square_block() {
        let qr = render_qr("https://abc123.lhr.life").unwrap();
        let lines: Vec<&str> = qr.lines().collect();

        assert!(lines.len() > 10);
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }
}
