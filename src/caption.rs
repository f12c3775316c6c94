use crate::error::{PipelineError, Result};
use crate::glyphs::{self, GLYPH_COLUMNS, GLYPH_ROWS};
use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Places commonly carrying CJK-capable fonts.
const FONT_CANDIDATES: &[&str] = &[
    r"C:\Windows\Fonts\msyh.ttc",
    r"C:\Windows\Fonts\msyh.ttf",
    r"C:\Windows\Fonts\simhei.ttf",
    "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-zenhei.ttc",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/System/Library/Fonts/PingFang.ttc",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
];

pub fn find_font(user_font: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user_font.filter(|p| p.is_file()) {
        return Some(p.to_path_buf());
    }
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptionStyle {
    /// Font size as a fraction of the frame height.
    pub font_ratio: f32,
    pub padding: u32,
    pub line_spacing: f32,
    pub bar_alpha: u8,
    /// Anchor the bar to the top edge instead of the bottom.
    pub top: bool,
}

impl CaptionStyle {
    pub const TITLE: CaptionStyle = CaptionStyle {
        font_ratio: 0.065,
        padding: 32,
        line_spacing: 1.3,
        bar_alpha: 150,
        top: true,
    };

    pub const CONTENT: CaptionStyle = CaptionStyle {
        font_ratio: 0.045,
        padding: 32,
        line_spacing: 1.3,
        bar_alpha: 170,
        top: false,
    };

    pub fn for_segment(is_title: bool) -> Self {
        if is_title { Self::TITLE } else { Self::CONTENT }
    }

    fn font_size(&self, height: u32) -> f32 {
        (height as f32 * self.font_ratio).floor().max(16.0)
    }
}

pub struct CaptionFont {
    font: Font,
}

impl CaptionFont {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| PipelineError::Font(format!("{}: {}", path.display(), e)))?;
        Ok(Self { font })
    }

    fn advance(&self, c: char, size: f32) -> f32 {
        self.font.metrics(c, size).advance_width
    }

    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.advance(c, size)).sum()
    }

    fn ascent(&self, size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(size)
            .map(|m| m.ascent)
            .unwrap_or(size * 0.8)
    }
}

/// Greedy per-character wrapping so that no line exceeds `max_width`.
/// Works for scripts without spaces.
fn wrap_by_width(text: &str, max_width: f32, width_of: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == '\n' {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            continue;
        }
        let mut candidate = current.clone();
        candidate.push(ch);
        if width_of(&candidate) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, ch.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn blend_over(dst: &mut Rgba<u8>, src: [u8; 3], coverage: u8) {
    if coverage == 0 {
        return;
    }
    let sa = coverage as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return;
    }
    for i in 0..3 {
        let s = src[i] as f32;
        let d = dst[i] as f32;
        dst[i] = ((s * sa + d * da * (1.0 - sa)) / out_a).round() as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

/// Pixel size of one built-in glyph dot at font size `size`.
fn builtin_scale(size: f32) -> u32 {
    ((size / (GLYPH_ROWS + 1) as f32) as u32).max(1)
}

fn builtin_advance(scale: u32) -> u32 {
    (GLYPH_COLUMNS + 1) * scale
}

/// Transparent overlay of `resolution` with a translucent bar holding the
/// centered, wrapped caption. Without a font the caption is drawn with the
/// built-in ASCII glyphs.
pub fn render_caption_panel(
    text: &str,
    resolution: (u32, u32),
    font: Option<&CaptionFont>,
    style: CaptionStyle,
) -> RgbaImage {
    let (width, height) = resolution;
    let mut img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let size = style.font_size(height);
    let max_text_width = width.saturating_sub(style.padding * 2) as f32;

    let lines = match font {
        Some(f) => wrap_by_width(text, max_text_width, |s| f.text_width(s, size)),
        None => {
            let advance = builtin_advance(builtin_scale(size)) as f32;
            wrap_by_width(text, max_text_width, |s| s.chars().count() as f32 * advance)
        }
    };
    let line_height = (size * style.line_spacing) as u32;
    let panel_height = (line_height * lines.len() as u32 + style.padding * 2).min(height);
    let y0 = if style.top { 0 } else { height - panel_height };

    for y in y0..y0 + panel_height {
        for x in 0..width {
            img.put_pixel(x, y, Rgba([0, 0, 0, style.bar_alpha]));
        }
    }

    let Some(font) = font else {
        debug!("No caption font, using built-in glyphs");
        draw_builtin_lines(&mut img, &lines, size, line_height, y0 + style.padding);
        return img;
    };

    let ascent = font.ascent(size);
    let mut y_text = (y0 + style.padding) as f32;
    for line in &lines {
        let line_width = font.text_width(line, size);
        let mut pen_x = ((width as f32 - line_width) / 2.0).max(0.0);
        let baseline = y_text + ascent;
        for ch in line.chars() {
            let (metrics, bitmap) = font.font.rasterize(ch, size);
            let gx = pen_x.round() as i64 + metrics.xmin as i64;
            let gy = baseline.round() as i64 - metrics.height as i64 - metrics.ymin as i64;
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let px = gx + col as i64;
                    let py = gy + row as i64;
                    if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                        continue;
                    }
                    let coverage = bitmap[row * metrics.width + col];
                    blend_over(img.get_pixel_mut(px as u32, py as u32), [255, 255, 255], coverage);
                }
            }
            pen_x += metrics.advance_width;
        }
        y_text += line_height as f32;
    }
    img
}

fn draw_builtin_lines(img: &mut RgbaImage, lines: &[String], size: f32, line_height: u32, top: u32) {
    let (width, height) = img.dimensions();
    let scale = builtin_scale(size);
    let advance = builtin_advance(scale);
    let mut y_text = top + (size as u32).saturating_sub(GLYPH_ROWS * scale) / 2;
    for line in lines {
        let line_width = line.chars().count() as u32 * advance;
        let mut pen_x = width.saturating_sub(line_width) / 2;
        for ch in line.chars() {
            for row in 0..GLYPH_ROWS {
                for col in 0..GLYPH_COLUMNS {
                    if !glyphs::is_set(ch, col, row) {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = pen_x + col * scale + dx;
                            let py = y_text + row * scale + dy;
                            if px < width && py < height {
                                img.put_pixel(px, py, Rgba([255, 255, 255, 255]));
                            }
                        }
                    }
                }
            }
            pen_x += advance;
        }
        y_text += line_height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_by_measured_width() {
        let lines = wrap_by_width("abcdefg", 3.0, |s| s.chars().count() as f32);
        assert_eq!(lines, vec!["abc", "def", "g"]);
        // a single over-wide glyph still gets its own line
        let lines = wrap_by_width("ab", 0.5, |s| s.chars().count() as f32);
        assert_eq!(lines, vec!["a", "b"]);
        assert!(wrap_by_width("", 10.0, |_| 0.0).is_empty());
    }

    #[test]
    fn content_bar_sits_at_bottom() {
        let img = render_caption_panel("hello", (320, 240), None, CaptionStyle::CONTENT);
        assert_eq!(img.dimensions(), (320, 240));
        assert_eq!(img.get_pixel(10, 239)[3], 170);
        assert_eq!(img.get_pixel(10, 0)[3], 0);
    }

    #[test]
    fn title_bar_sits_at_top() {
        let img = render_caption_panel("title", (320, 240), None, CaptionStyle::for_segment(true));
        assert_eq!(img.get_pixel(10, 0)[3], 150);
        assert_eq!(img.get_pixel(10, 239)[3], 0);
    }

    #[test]
    fn title_style_is_larger_and_lighter() {
        assert!(CaptionStyle::TITLE.font_ratio > CaptionStyle::CONTENT.font_ratio);
        assert!(CaptionStyle::TITLE.bar_alpha < CaptionStyle::CONTENT.bar_alpha);
        assert_eq!(CaptionStyle::CONTENT.font_size(100), 16.0);
        assert_eq!(CaptionStyle::CONTENT.font_size(720), 32.0);
    }

    #[test]
    fn draws_text_without_a_font() {
        let img = render_caption_panel("HI", (320, 240), None, CaptionStyle::CONTENT);
        let white = img.pixels().filter(|p| **p == Rgba([255, 255, 255, 255])).count();
        // content size 16 gives 2px dots; 'H' has 17 dots and 'I' 11
        assert_eq!(white, (17 + 11) * 4);
        let blank = render_caption_panel("  ", (320, 240), None, CaptionStyle::CONTENT);
        assert!(blank.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn white_over_translucent_black() {
        let mut px = Rgba([0, 0, 0, 170]);
        blend_over(&mut px, [255, 255, 255], 255);
        assert_eq!(px, Rgba([255, 255, 255, 255]));
        let mut px = Rgba([0, 0, 0, 0]);
        blend_over(&mut px, [255, 255, 255], 0);
        assert_eq!(px, Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn explicit_font_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.ttf");
        let found = find_font(Some(&missing));
        assert_ne!(found.as_deref(), Some(missing.as_path()));
    }
}
