// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/main.rs - 视频检测主程序
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shanan_video::{
  args::Args,
  config::{ClassNames, Palette, load_network_config},
  input::{FrameSource, GStreamerInput},
  model::YoloOnnxBuilder,
  output::{
    ColorMode, Draw, OutputSettings, OutputWrapper,
    draw::{find_system_font, load_font},
  },
  postprocess::Thresholds,
  task::{ContinuousTask, Task, install_interrupt_handler},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("视频文件: {}", args.video.display());
  info!("数据集: {}", args.dataset);
  info!("网络描述: {}", args.cfg.display());
  info!("网络权重: {}", args.weights.display());
  info!("输入分辨率: {}", args.reso);
  info!("置信度阈值: {}", args.confidence);
  info!("NMS 阈值: {}", args.nms_thresh);
  if args.write_output {
    info!("输出目录: {} ({})", args.output_dir.display(), args.fourcc);
  }

  // 配置在打开任何视频或模型之前全部校验
  let network = load_network_config(&args.cfg)?;
  let names = ClassNames::load(&args.names)?;
  names.ensure_covers(network.classes)?;
  let palette = match &args.palette {
    Some(path) => Palette::load(path)?,
    None => Palette::default(),
  };
  let font = match &args.font {
    Some(path) => Some(load_font(path)?),
    None => find_system_font(),
  };

  let stop = install_interrupt_handler().context("无法安装 Ctrl-C 处理函数")?;

  info!("正在加载模型...");
  let model = YoloOnnxBuilder::new(&args.weights, network, args.reso.pixels()).build()?;
  info!("模型加载完成");

  let input = GStreamerInput::open(&args.video)?;
  let video_info = input.video_info();

  let color_mode = if args.class_colors {
    ColorMode::PerClass
  } else {
    ColorMode::Random
  };
  let draw = Draw::new(names, palette, font).with_color_mode(color_mode);
  let settings = OutputSettings {
    write_output: args.write_output,
    output_dir: args.output_dir.clone(),
    codec: args.fourcc,
  };
  let output = OutputWrapper::open(&settings, &args.video, video_info, draw)?;

  let max_frames = (args.max_frames > 0).then_some(args.max_frames);
  let summary = ContinuousTask::new(Thresholds {
    confidence: args.confidence,
    nms: args.nms_thresh,
  })
  .with_max_frames(max_frames)
  .with_stop_flag(stop)
  .run_task(input, model, output)?;

  info!(
    "处理完成: {} 帧，{} 个目标，平均 FPS {:.2}",
    summary.frames,
    summary.detections,
    summary.average_fps()
  );

  Ok(())
}
