//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks of a fit in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - intensity samples: `o`
//! - fitted step function: `-` plateaus joined by `|` risers

/// Render one trace with its step fit.
///
/// `frames`, `intensity` and `fit` are parallel series; `fit` may be empty to
/// plot the raw trace only.
pub fn render_trace_plot(frames: &[i64], intensity: &[f64], fit: &[f64], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let n = frames.len().min(intensity.len());
    if n == 0 {
        return "Plot: no samples\n".to_string();
    }
    let xs: Vec<f64> = frames[..n].iter().map(|&f| f as f64).collect();

    let (t_min, t_max) = range(xs.iter().copied()).unwrap_or((xs[0] - 0.5, xs[0] + 0.5));
    let (y_min, y_max) = range(intensity[..n].iter().chain(fit.iter().take(n)).copied())
        .unwrap_or((intensity[0] - 0.5, intensity[0] + 0.5));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Fit first, so samples overlay it.
    if fit.len() >= n {
        let cells: Vec<(usize, usize)> = xs
            .iter()
            .zip(&fit[..n])
            .map(|(&t, &y)| (map_x(t, t_min, t_max, width), map_y(y, y_min, y_max, height)))
            .collect();
        draw_stairs(&mut grid, &cells);
    }

    for (&t, &y) in xs.iter().zip(&intensity[..n]) {
        let x = map_x(t, t_min, t_max, width);
        let y = map_y(y, y_min, y_max, height);
        grid[y][x] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: frame=[{t_min:.0}, {t_max:.0}] | intensity=[{y_min:.2}, {y_max:.2}]\n"
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

fn range(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Plateau at the old level up to the next sample, then a riser to the new level.
fn draw_stairs(grid: &mut [Vec<char>], cells: &[(usize, usize)]) {
    let Some(&(x0, y0)) = cells.first() else {
        return;
    };
    grid[y0][x0] = '-';
    for pair in cells.windows(2) {
        let (xa, ya) = pair[0];
        let (xb, yb) = pair[1];
        draw_line(grid, xa, ya, xb, ya, '-');
        draw_line(grid, xb, ya, xb, yb, '|');
    }
}

/// Integer line drawing (Bresenham-ish); only fills blank cells.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
