// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// An RGBA color. On the wire this is an array of three channel values, or four
/// when the alpha channel is not opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    /// The red channel value.
    pub r: u8,
    /// The green channel value.
    pub g: u8,
    /// The blue channel value.
    pub b: u8,
    /// The alpha channel value.
    pub a: u8,
}

impl Color {
    /// Creates a new RGBA color given all channel values.
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color { r, g, b, a }
    }

    /// Creates a new opaque RGB color given the channel values.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color {
            r,
            g,
            b,
            a: u8::MAX,
        }
    }

    /// Whether the alpha channel is fully opaque.
    pub fn is_opaque(&self) -> bool {
        self.a == u8::MAX
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::rgb(u8::MIN, u8::MIN, u8::MIN)
    }
}
