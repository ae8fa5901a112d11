//! Built-in command executor: the open image and the current tool settings.
//!
//! There is no capture backend here. `capture` opens a blank canvas of the
//! requested size so annotation commands have something to draw on, which
//! is enough to drive a background session end to end.

use shineyshot_session::{CommandExecutor, ExecError, Outcome};
use std::fmt;
use std::io::Write;

const SCREEN_SIZE: (u32, u32) = (1920, 1080);
const WINDOW_SIZE: (u32, u32) = (1280, 720);
const MAX_WIDTH: u32 = 64;

const PALETTE: &[(&str, Color)] = &[
    ("black", Color(0x00, 0x00, 0x00)),
    ("white", Color(0xff, 0xff, 0xff)),
    ("red", Color(0xe5, 0x39, 0x35)),
    ("green", Color(0x43, 0xa0, 0x47)),
    ("blue", Color(0x1e, 0x88, 0xe5)),
    ("yellow", Color(0xfd, 0xd8, 0x35)),
    ("orange", Color(0xfb, 0x8c, 0x00)),
    ("purple", Color(0x8e, 0x24, 0xaa)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(u8, u8, u8);

impl Color {
    fn parse(value: &str) -> Option<Self> {
        if let Some(hex) = value.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return None;
            }
            let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
            return Some(Color(channel(0..2)?, channel(2..4)?, channel(4..6)?));
        }
        let lowered = value.to_ascii_lowercase();
        PALETTE
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, color)| *color)
    }

    fn name(&self) -> Option<&'static str> {
        PALETTE
            .iter()
            .find(|(_, color)| color == self)
            .map(|(name, _)| *name)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mark {
    Rect {
        x: i64,
        y: i64,
        w: u32,
        h: u32,
        color: Color,
        width: u32,
    },
    Line {
        from: (i64, i64),
        to: (i64, i64),
        color: Color,
        width: u32,
        arrow: bool,
    },
}

#[derive(Debug, Clone)]
struct Canvas {
    source: String,
    width: u32,
    height: u32,
    marks: Vec<Mark>,
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mark::Rect {
                x,
                y,
                w,
                h,
                color,
                width,
            } => write!(f, "rect {},{} {}x{} {} {}px", x, y, w, h, color, width),
            Mark::Line {
                from,
                to,
                color,
                width,
                arrow,
            } => write!(
                f,
                "{} {},{} -> {},{} {} {}px",
                if *arrow { "arrow" } else { "line" },
                from.0,
                from.1,
                to.0,
                to.1,
                color,
                width
            ),
        }
    }
}

impl Canvas {
    fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x <= i64::from(self.width) && y <= i64::from(self.height)
    }
}

/// Tool state owned by one daemon for its whole life.
#[derive(Debug)]
pub struct ToolSession {
    color: Color,
    width: u32,
    canvas: Option<Canvas>,
}

impl Default for ToolSession {
    fn default() -> Self {
        Self {
            color: Color(0xe5, 0x39, 0x35),
            width: 3,
            canvas: None,
        }
    }
}

impl ToolSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn capture(&mut self, args: &[&str], out: &mut dyn Write) -> Result<(), ExecError> {
        let (source, (width, height)) = match args {
            ["screen"] => ("screen".to_string(), SCREEN_SIZE),
            ["window", title @ ..] if !title.is_empty() => {
                (format!("window {}", title.join(" ")), WINDOW_SIZE)
            }
            ["region", x, y, w, h] => {
                let (x, y) = (coord(x)?, coord(y)?);
                let (w, h) = (size(w)?, size(h)?);
                (format!("region {},{}", x, y), (w, h))
            }
            _ => {
                return Err(ExecError::new(
                    "usage: capture screen | capture window <title> | capture region <x> <y> <w> <h>",
                ))
            }
        };

        writeln!(out, "captured {} ({}x{})", source, width, height)?;
        self.canvas = Some(Canvas {
            source,
            width,
            height,
            marks: Vec::new(),
        });
        Ok(())
    }

    fn canvas_mut(&mut self) -> Result<&mut Canvas, ExecError> {
        self.canvas
            .as_mut()
            .ok_or_else(|| ExecError::new("no image open; run capture first"))
    }

    fn rect(
        &mut self,
        args: &[&str],
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<(), ExecError> {
        let [x, y, w, h] = args else {
            return Err(ExecError::new("usage: rect <x> <y> <w> <h>"));
        };
        let (x, y, w, h) = (coord(x)?, coord(y)?, size(w)?, size(h)?);
        let (color, width) = (self.color, self.width);
        let canvas = self.canvas_mut()?;

        if !canvas.contains(x, y) || !canvas.contains(x + i64::from(w), y + i64::from(h)) {
            writeln!(err, "warning: rect extends past the {}x{} image", canvas.width, canvas.height)?;
        }
        canvas.marks.push(Mark::Rect {
            x,
            y,
            w,
            h,
            color,
            width,
        });
        writeln!(out, "rect {},{} {}x{}", x, y, w, h)?;
        Ok(())
    }

    fn line(
        &mut self,
        args: &[&str],
        arrow: bool,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<(), ExecError> {
        let kind = if arrow { "arrow" } else { "line" };
        let [x1, y1, x2, y2] = args else {
            return Err(ExecError::new(format!("usage: {} <x1> <y1> <x2> <y2>", kind)));
        };
        let from = (coord(x1)?, coord(y1)?);
        let to = (coord(x2)?, coord(y2)?);
        let (color, width) = (self.color, self.width);
        let canvas = self.canvas_mut()?;

        if !canvas.contains(from.0, from.1) || !canvas.contains(to.0, to.1) {
            writeln!(err, "warning: {} extends past the {}x{} image", kind, canvas.width, canvas.height)?;
        }
        canvas.marks.push(Mark::Line {
            from,
            to,
            color,
            width,
            arrow,
        });
        writeln!(out, "{} {},{} -> {},{}", kind, from.0, from.1, to.0, to.1)?;
        Ok(())
    }

    fn set_color(&mut self, args: &[&str], out: &mut dyn Write) -> Result<(), ExecError> {
        let [value] = args else {
            return Err(ExecError::new("usage: color <name|#rrggbb>"));
        };
        self.color = Color::parse(value)
            .ok_or_else(|| ExecError::new(format!("unknown color {:?}", value)))?;
        writeln!(out, "color set to {}", self.color)?;
        Ok(())
    }

    fn set_width(
        &mut self,
        args: &[&str],
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<(), ExecError> {
        let [value] = args else {
            return Err(ExecError::new("usage: width <pixels>"));
        };
        let requested = size(value)?;
        if requested > MAX_WIDTH {
            writeln!(err, "warning: width clamped to {}", MAX_WIDTH)?;
        }
        self.width = requested.min(MAX_WIDTH);
        writeln!(out, "width set to {}", self.width)?;
        Ok(())
    }

    fn status(&self, out: &mut dyn Write) -> Result<(), ExecError> {
        match &self.canvas {
            Some(canvas) => writeln!(
                out,
                "image: {} {}x{}, {} annotation(s)",
                canvas.source,
                canvas.width,
                canvas.height,
                canvas.marks.len()
            )?,
            None => writeln!(out, "image: none")?,
        }
        writeln!(out, "color: {}", self.color)?;
        writeln!(out, "width: {}", self.width)?;
        Ok(())
    }
}

impl CommandExecutor for ToolSession {
    fn execute(
        &mut self,
        command: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Outcome, ExecError> {
        let words: Vec<&str> = command.split_whitespace().collect();
        let Some((verb, args)) = words.split_first() else {
            return Ok(Outcome::Continue);
        };

        match *verb {
            "capture" => self.capture(args, out)?,
            "rect" => self.rect(args, out, err)?,
            "line" => self.line(args, false, out, err)?,
            "arrow" => self.line(args, true, out, err)?,
            "color" => self.set_color(args, out)?,
            "width" => self.set_width(args, out, err)?,
            "status" => self.status(out)?,
            "marks" => {
                let canvas = self.canvas_mut()?;
                for (index, mark) in canvas.marks.iter().enumerate() {
                    writeln!(out, "{}: {}", index + 1, mark)?;
                }
            }
            "clear" => {
                let canvas = self.canvas_mut()?;
                let removed = canvas.marks.len();
                canvas.marks.clear();
                writeln!(out, "cleared {} annotation(s)", removed)?;
            }
            "echo" => writeln!(out, "{}", args.join(" "))?,
            "quit" | "exit" => return Ok(Outcome::EndSession),
            other => return Err(ExecError::new(format!("unknown command: {}", other))),
        }
        Ok(Outcome::Continue)
    }
}

fn coord(value: &str) -> Result<i64, ExecError> {
    value
        .parse()
        .map_err(|_| ExecError::new(format!("invalid coordinate {:?}", value)))
}

fn size(value: &str) -> Result<u32, ExecError> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ExecError::new(format!("invalid size {:?}", value))),
    }
}
