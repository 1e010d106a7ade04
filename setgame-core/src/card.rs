//! Set card labels.
//!
//! Class folders of a card dataset are named after the card they hold, e.g.
//! `2-purple-striped-diamonds`. The same names come back out of the exported
//! `labels.txt`, so consumers can turn a predicted class into a [`Card`].

use clap::builder::OsStr;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Red,
    Purple,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fill {
    Solid,
    Striped,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Squiggle,
    Diamond,
    Oval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub count: u8,
    pub color: Color,
    pub fill: Fill,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCardError(String);

impl fmt::Display for ParseCardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a card label", self.0)
    }
}

impl std::error::Error for ParseCardError {}

impl Color {
    fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Purple => "purple",
            Color::Green => "green",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "red" => Some(Color::Red),
            "purple" => Some(Color::Purple),
            "green" => Some(Color::Green),
            _ => None,
        }
    }
}

impl Fill {
    fn as_str(self) -> &'static str {
        match self {
            Fill::Solid => "solid",
            Fill::Striped => "striped",
            Fill::Empty => "empty",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "solid" => Some(Fill::Solid),
            "striped" => Some(Fill::Striped),
            "empty" => Some(Fill::Empty),
            _ => None,
        }
    }
}

impl Shape {
    fn as_str(self) -> &'static str {
        match self {
            Shape::Squiggle => "squiggle",
            Shape::Diamond => "diamond",
            Shape::Oval => "oval",
        }
    }

    /// Accepts both the singular and the plural spelling.
    fn parse(s: &str) -> Option<Self> {
        match s.strip_suffix('s').unwrap_or(s) {
            "squiggle" => Some(Shape::Squiggle),
            "diamond" => Some(Shape::Diamond),
            "oval" => Some(Shape::Oval),
            _ => None,
        }
    }
}

impl FromStr for Card {
    type Err = ParseCardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCardError(s.to_string());
        let lower = s.to_ascii_lowercase();
        let mut parts = lower.splitn(4, '-');
        let mut next = || parts.next().ok_or_else(err);
        let count = match next()? {
            "1" => 1,
            "2" => 2,
            "3" => 3,
            _ => return Err(err()),
        };
        let color = Color::parse(next()?).ok_or_else(err)?;
        let fill = Fill::parse(next()?).ok_or_else(err)?;
        let shape = Shape::parse(next()?).ok_or_else(err)?;
        Ok(Card {
            count,
            color,
            fill,
            shape,
        })
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.count > 1 { "s" } else { "" };
        write!(
            f,
            "{}-{}-{}-{}{}",
            self.count,
            self.color.as_str(),
            self.fill.as_str(),
            self.shape.as_str(),
            plural
        )
    }
}

/// What the classifier learns to tell apart.
///
/// `Card` keeps the folder names as classes; the attribute targets merge
/// folders that share the attribute into one class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Target {
    #[default]
    Card,
    Number,
    Color,
    Shading,
    Shape,
}

impl Target {
    pub fn project(self, card: &Card) -> String {
        match self {
            Target::Card => card.to_string(),
            Target::Number => card.count.to_string(),
            Target::Color => card.color.as_str().to_string(),
            Target::Shading => card.fill.as_str().to_string(),
            Target::Shape => card.shape.as_str().to_string(),
        }
    }
}

impl From<Target> for OsStr {
    fn from(value: Target) -> Self {
        format!("{value:?}").to_lowercase().into()
    }
}
