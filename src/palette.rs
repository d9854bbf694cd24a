//! Display colours for models.

/// `n` colours with evenly spaced hues around the colour wheel.
pub fn palette(n: usize) -> Vec<[u8; 3]> {
    (0..n)
        .map(|i| hsv_to_rgb(360.0 * i as f64 / n as f64, 0.65, 0.95))
        .collect()
}

/// Converts hue (degrees), saturation and value (0-1) to 8-bit RGB.
pub fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> [u8; 3] {
    let h = hue.rem_euclid(360.0) / 60.0;
    let c = value * saturation;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let m = value - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_byte = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_byte(r), to_byte(g), to_byte(b)]
}
