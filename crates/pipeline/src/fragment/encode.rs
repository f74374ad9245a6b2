use tracing::debug;

use crate::assembler::{PassBuilder, Terminal};
use crate::error::Result;
use crate::operation::{Encode, ExtractAudio, Gif, OpContext};

pub(super) fn encode(builder: &mut PassBuilder<'_>, ctx: &OpContext, encode: &Encode) -> Result<()> {
    debug!(operation = ctx.index, codec = %encode.video_codec, "Terminal encode");
    builder.set_terminal(Terminal::Encode {
        ctx: *ctx,
        encode: encode.clone(),
    });
    Ok(())
}

pub(super) fn gif(builder: &mut PassBuilder<'_>, ctx: &OpContext, gif: &Gif) -> Result<()> {
    if let (Some(timeline), true) = (builder.timeline, gif.start_time > 0.0) {
        if gif.start_time >= timeline {
            return Err(ctx.invalid(
                "start_time",
                format!("{} is past the end of the {timeline}s timeline", gif.start_time),
            ));
        }
    }
    builder.set_terminal(Terminal::Gif {
        ctx: *ctx,
        gif: gif.clone(),
    });
    Ok(())
}

pub(super) fn extract_audio(builder: &mut PassBuilder<'_>, ctx: &OpContext, extract: &ExtractAudio) -> Result<()> {
    builder.set_terminal(Terminal::ExtractAudio {
        ctx: *ctx,
        extract: extract.clone(),
    });
    Ok(())
}
