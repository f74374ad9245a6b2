//! Fragment generation: one function per operation kind, each appending
//! nodes to the pass under construction.

mod composite;
mod encode;
mod text;
mod timeline;

use crate::assembler::PassBuilder;
use crate::error::Result;
use crate::operation::{Descriptor, OpContext};

pub(crate) fn apply(builder: &mut PassBuilder<'_>, ctx: &OpContext, descriptor: &Descriptor) -> Result<()> {
    builder.require(ctx, descriptor.requirement())?;

    match descriptor {
        Descriptor::Trim(trim) => timeline::trim(builder, ctx, trim),
        Descriptor::Speed(speed) => timeline::speed(builder, ctx, speed),
        Descriptor::Concat(concat) => timeline::concat(builder, ctx, concat),
        Descriptor::Text(overlay) | Descriptor::TextSequence(overlay) => text::overlay(builder, ctx, overlay),
        Descriptor::Karaoke(karaoke) => text::karaoke(builder, ctx, karaoke),
        Descriptor::Watermark(watermark) => composite::watermark(builder, ctx, watermark),
        Descriptor::Audio(audio) => composite::audio(builder, ctx, audio),
        Descriptor::BackgroundColor(background) => composite::background_color(builder, ctx, background),
        Descriptor::ConvertToPlatform(convert) => composite::platform(builder, ctx, convert),
        Descriptor::Transcode(options) | Descriptor::Compress(options) => encode::encode(builder, ctx, options),
        Descriptor::Gif(gif) => encode::gif(builder, ctx, gif),
        Descriptor::ExtractAudio(extract) => encode::extract_audio(builder, ctx, extract),
        Descriptor::DownloadFromYoutube(_) => Err(ctx.unsupported(
            None,
            "downloads replace the source and must be the first operation",
        )),
    }
}
